use clap::Parser;
use irrigation::{Config, Error, Report, Table};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Tells whether the irrigation pump should run, from the latest weather
/// observation collected for a city.
#[derive(Parser)]
#[command(name = "irrigation", version, about, long_about = None)]
struct Cli {
    /// City exactly as tagged in the data file, e.g. "Curitiba,BR"
    city: Option<String>,

    /// Ignored
    #[arg(hide = true)]
    rest: Vec<String>,
}

fn main() -> miette::Result<()> {
    // stdout only carries the report
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Any usage error is a failed run, exit 1 like the others
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };
    if !cli.rest.is_empty() {
        debug!(ignored = ?cli.rest, "extra arguments");
    }
    let city = cli.city.ok_or(Error::MissingArgument)?;
    let city = city.trim();

    let config = Config::default();
    debug!(city, file = %config.data_file.display(), "starting");

    let table = Table::load(&config.data_file)?;
    let report = Report::new(&table, city, &config)?;
    print!("{report}");

    Ok(())
}

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use logos::Logos;
use miette::Diagnostic;
use thiserror::Error;
use time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime,
    PrimitiveDateTime, UtcOffset,
};
use tracing::{debug, warn};

/// Written by the data producer in the working directory.
pub const DATA_FILE: &str = "weather.csv";

pub const CITY_COLUMN: &str = "city_query";
pub const TIMESTAMP_COLUMN: &str = "ts";
pub const POP_COLUMN: &str = "pop";
pub const RAIN_COLUMN: &str = "rain_3h";

/// Columns shown for the latest matching rows. Display only.
pub const PREVIEW_COLUMNS: [&str; 6] = [
    TIMESTAMP_COLUMN,
    "temp_c",
    "humidity",
    RAIN_COLUMN,
    POP_COLUMN,
    "weather_desc",
];
pub const PREVIEW_ROWS: usize = 5;

/// Probability, in percent, from which rain is expected.
pub const POP_THRESHOLD: f64 = 60.0;
/// Rainfall over the last 3 hours, in mm, from which the soil is wet enough.
pub const RAIN_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_file: PathBuf,
    pub preview_rows: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from(DATA_FILE),
            preview_rows: PREVIEW_ROWS,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Missing city argument")]
    #[diagnostic(
        code(irrigation::missing_argument),
        help("usage: irrigation \"Curitiba,BR\"")
    )]
    MissingArgument,
    #[error("File {} not found. Run the data producer first.", .path.display())]
    #[diagnostic(code(irrigation::data_source_not_found))]
    DataSourceNotFound { path: PathBuf },
    #[error("Could not read {}", .path.display())]
    #[diagnostic(code(irrigation::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    #[diagnostic(code(irrigation::malformed_table))]
    MalformedTable(#[from] TableError),
    #[error("The table does not contain the expected `{column}` column")]
    #[diagnostic(code(irrigation::schema))]
    SchemaError { column: String },
    #[error("No data found for {city:?}")]
    #[diagnostic(code(irrigation::no_matching_records))]
    NoMatchingRecords {
        city: String,
        #[help]
        hint: Option<String>,
    },
}

#[derive(Logos, Debug, PartialEq)]
enum Token {
    #[token(",")]
    Comma,
    #[regex(r"\r?\n")]
    Newline,
    // Only opens at the start of a field. Commas and newlines are literal
    // in there, `""` is an escaped quote
    #[regex(r#""([^"]|"")*""#)]
    Quoted,
    // A quote further in the field is a plain character
    #[regex(r#"[^,\r\n"][^,\r\n]*"#)]
    Bare,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("Empty table, expected a header row")]
    Empty,
    #[error("Unterminated quoted field starting on line {0}")]
    BadQuote(usize),
    #[error("Line {line} has {found} fields, the header only has {expected}")]
    TooManyFields {
        line: usize,
        expected: usize,
        found: usize,
    },
}

/// Observations in the order they were written. Never re-sorted.
#[derive(Debug, Clone)]
pub struct Table {
    // Only known when read through `Table::load`
    source: Option<PathBuf>,
    columns: Vec<String>,
    // Every row has exactly `columns.len()` cells
    rows: Vec<Vec<String>>,
}

impl FromStr for Table {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix('\u{feff}').unwrap_or(s);
        let mut lexer = Token::lexer(s);

        let mut records: Vec<(usize, Vec<String>)> = Vec::new();
        let mut record: Vec<String> = Vec::new();
        let mut field: Option<String> = None;
        let mut line = 1;
        let mut record_line = 1;

        while let Some(token) = lexer.next() {
            match token {
                Ok(Token::Comma) => record.push(field.take().unwrap_or_default()),
                Ok(Token::Newline) => {
                    // A lone empty field means a blank line, skip it
                    if !record.is_empty() || field.is_some() {
                        record.push(field.take().unwrap_or_default());
                        records.push((record_line, std::mem::take(&mut record)));
                    }
                    line += 1;
                    record_line = line;
                }
                Ok(Token::Quoted) => {
                    let slice = lexer.slice();
                    line += slice.matches('\n').count();
                    let unquoted = slice[1..slice.len() - 1].replace("\"\"", "\"");
                    field.get_or_insert_with(String::new).push_str(&unquoted);
                }
                Ok(Token::Bare) => field
                    .get_or_insert_with(String::new)
                    .push_str(lexer.slice()),
                Err(()) => return Err(TableError::BadQuote(line)),
            }
        }
        if !record.is_empty() || field.is_some() {
            record.push(field.take().unwrap_or_default());
            records.push((record_line, record));
        }

        let mut records = records.into_iter();
        let (_, columns) = records.next().ok_or(TableError::Empty)?;

        let mut rows = Vec::new();
        for (line, mut row) in records {
            if row.len() > columns.len() {
                return Err(TableError::TooManyFields {
                    line,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
            // Short rows are missing values, not errors
            row.resize(columns.len(), String::new());
            rows.push(row);
        }

        Ok(Self {
            source: None,
            columns,
            rows,
        })
    }
}

impl Table {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => Error::DataSourceNotFound {
                path: path.to_path_buf(),
            },
            _ => Error::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;

        let mut table = Table::from_str(&content)?;
        table.source = Some(path.to_path_buf());
        table.require_column(CITY_COLUMN)?;
        debug!(
            path = %path.display(),
            rows = table.len(),
            columns = table.columns.len(),
            "loaded observation table"
        );

        Ok(table)
    }

    /// The file the table was read from, `None` if it was parsed from memory.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize, Error> {
        self.column_index(name).ok_or_else(|| Error::SchemaError {
            column: name.to_string(),
        })
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().enumerate().map(|(index, values)| Record {
            table: self,
            index,
            values,
        })
    }

    /// Every record tagged with `city`, ignoring case and surrounding whitespace.
    ///
    /// Rows with a blank city are missing values and never match, not even a
    /// blank query.
    pub fn select(&self, city: &str) -> Result<Selection<'_>, Error> {
        let column = self.require_column(CITY_COLUMN)?;
        let city = city.trim();
        let wanted = city.to_lowercase();

        let records: Vec<Record> = self
            .records()
            .filter(|record| {
                let tag = record.values[column].trim();
                !tag.is_empty() && tag.to_lowercase() == wanted
            })
            .collect();

        if records.is_empty() {
            let hint = match &self.source {
                Some(path) => format!("check the name exactly as it appears in {}", path.display()),
                None => String::from("check the exact spelling of the city"),
            };
            return Err(Error::NoMatchingRecords {
                city: city.to_string(),
                hint: Some(hint),
            });
        }
        debug!(city, matches = records.len(), "selected observations");

        let selection = Selection { records };
        if !selection.is_chronological() {
            warn!(city, "observations are not ordered, using the last one in the file");
        }

        Ok(selection)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    table: &'a Table,
    index: usize,
    values: &'a [String],
}

impl<'a> Record<'a> {
    /// Position of the row in the table, header excluded.
    pub fn index(&self) -> usize {
        self.index
    }

    /// `None` if the table has no such column.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.table
            .column_index(column)
            .map(|index| self.values[index].as_str())
    }

    pub fn timestamp(&self) -> Option<PrimitiveDateTime> {
        self.get(TIMESTAMP_COLUMN).and_then(parse_timestamp)
    }
}

pub fn parse_timestamp(s: &str) -> Option<PrimitiveDateTime> {
    let s = s.trim();
    PrimitiveDateTime::parse(
        s,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    )
    .or_else(|_| {
        PrimitiveDateTime::parse(
            s,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(s, format_description!("[year]-[month]-[day] [hour]:[minute]"))
    })
    .or_else(|_| {
        OffsetDateTime::parse(s, &Rfc3339).map(|date| {
            let date = date.to_offset(UtcOffset::UTC);
            PrimitiveDateTime::new(date.date(), date.time())
        })
    })
    .ok()
}

/// Non-empty by construction.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    records: Vec<Record<'a>>,
}

impl<'a> Selection<'a> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record<'a>] {
        &self.records
    }

    /// The most recent observation, which is the last one in table order.
    pub fn current(&self) -> Record<'a> {
        self.records[self.records.len() - 1]
    }

    pub fn tail(&self, n: usize) -> &[Record<'a>] {
        &self.records[self.records.len().saturating_sub(n)..]
    }

    /// Rows whose timestamp can't be parsed are ignored.
    pub fn is_chronological(&self) -> bool {
        let timestamps: Vec<PrimitiveDateTime> =
            self.records.iter().filter_map(Record::timestamp).collect();
        timestamps.windows(2).all(|pair| pair[0] <= pair[1])
    }
}

/// Parses `raw`, falling back on `default` if it's missing or unparseable.
pub fn parse_or<T>(raw: Option<&str>, default: T) -> T
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(e) => {
            debug!(raw, "could not parse value ({e}), using the default");
            default
        }
    }
}

/// The producer writes the probability either as a fraction or as a
/// percentage. Anything below 1 is assumed to be a fraction. This is a
/// guess on the unit, nothing in the file says which one it is, and it
/// means a stored `1` reads as 1% rather than certain rain.
pub fn normalize_pop(raw: Option<&str>) -> f64 {
    let pop = parse_or(raw, 0.0_f64);
    if pop.is_nan() {
        return 0.0;
    }
    if pop < 1.0 {
        pop * 100.0
    } else {
        pop
    }
}

pub fn normalize_rain(raw: Option<&str>) -> f64 {
    let rain = parse_or(raw, 0.0_f64);
    if rain.is_nan() {
        0.0
    } else {
        rain
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Percent, not clamped.
    pub pop: f64,
    /// mm over the last 3 hours, not clamped.
    pub rain_3h: f64,
}

impl Reading {
    pub fn from_record(record: &Record) -> Self {
        Self {
            pop: normalize_pop(record.get(POP_COLUMN)),
            rain_3h: normalize_rain(record.get(RAIN_COLUMN)),
        }
    }
}

// This exact line is read back by the pump controller
impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "POP={:.1} RAIN3H={:.1}", self.pop, self.rain_3h)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    PumpOffRainExpected,
    PumpOnDry,
}

impl Decision {
    pub fn from_reading(reading: &Reading) -> Self {
        if reading.pop >= POP_THRESHOLD || reading.rain_3h >= RAIN_THRESHOLD {
            Self::PumpOffRainExpected
        } else {
            Self::PumpOnDry
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::PumpOffRainExpected => "💧 Rain detected → the pump should be turned OFF.",
            Self::PumpOnDry => "☀️ Dry weather → irrigation allowed (pump ON).",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Everything printed for one run. The last line is always the [`Reading`].
#[derive(Debug, Clone)]
pub struct Report<'a> {
    pub city: String,
    pub selection: Selection<'a>,
    pub reading: Reading,
    pub decision: Decision,
    pub preview_rows: usize,
}

impl<'a> Report<'a> {
    pub fn new(table: &'a Table, city: &str, config: &Config) -> Result<Self, Error> {
        let selection = table.select(city)?;
        let reading = Reading::from_record(&selection.current());
        let decision = Decision::from_reading(&reading);

        for column in PREVIEW_COLUMNS {
            if table.column_index(column).is_none() {
                warn!(column, "column missing from the table, it will be shown empty");
            }
        }

        Ok(Self {
            city: city.trim().to_string(),
            selection,
            reading,
            decision,
            preview_rows: config.preview_rows,
        })
    }

    fn write_preview(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<(String, Vec<&str>)> = self
            .selection
            .tail(self.preview_rows)
            .iter()
            .map(|record| {
                let cells = PREVIEW_COLUMNS
                    .iter()
                    .map(|column| record.get(column).unwrap_or(""))
                    .collect();
                (record.index().to_string(), cells)
            })
            .collect();

        let index_width = rows.iter().map(|(index, _)| index.len()).max().unwrap_or(0);
        let widths: Vec<usize> = PREVIEW_COLUMNS
            .iter()
            .enumerate()
            .map(|(i, column)| {
                rows.iter()
                    .map(|(_, cells)| cells[i].chars().count())
                    .chain([column.len()])
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        write!(f, "{:index_width$}", "")?;
        for (column, width) in PREVIEW_COLUMNS.iter().zip(widths.iter().copied()) {
            write!(f, "  {column:>width$}")?;
        }
        writeln!(f)?;

        for (index, cells) in &rows {
            write!(f, "{index:>index_width$}")?;
            for (cell, width) in cells.iter().zip(widths.iter().copied()) {
                write!(f, "  {cell:>width$}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "📍 Selected city: {}", self.city)?;
        writeln!(
            f,
            "🧾 Last {} rows found:",
            self.selection.tail(self.preview_rows).len()
        )?;
        writeln!(f)?;
        self.write_preview(f)?;
        writeln!(f)?;
        writeln!(f, "{}", self.decision)?;
        writeln!(f)?;
        writeln!(f, "💬 Command for the pump controller:")?;
        writeln!(f, "{}", self.reading)
    }
}

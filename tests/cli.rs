//! Runs the `irrigation` binary against a `weather.csv` written in a
//! temporary working directory.

use std::{
    path::Path,
    process::{Command, Output},
};

const HEADER: &str = "ts,city_query,temp_c,humidity,rain_3h,pop,weather_desc\n";

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_irrigation"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run the irrigation binary")
}

fn write_table(dir: &Path, content: &str) {
    std::fs::write(dir.join("weather.csv"), content).unwrap();
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn prints_the_controller_command_last() {
    let dir = tempfile::tempdir().unwrap();
    write_table(
        dir.path(),
        &format!(
            "{HEADER}\
             2024-05-01 09:00:00,\"Curitiba,BR\",17.0,85,3.0,0.9,rain\n\
             2024-05-01 12:00:00,\"Curitiba,BR\",18.2,80,0.0,0.8,light rain\n\
             2024-05-01 12:00:00,\"Lima,PE\",22.0,60,0.0,0.0,clear sky\n"
        ),
    );

    let output = run(dir.path(), &["curitiba,br"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let stdout = stdout(&output);
    assert!(stdout.contains("curitiba,br"));
    assert!(stdout.contains("light rain"));
    assert!(!stdout.contains("clear sky"));
    assert!(stdout.contains("OFF"));
    assert_eq!(stdout.lines().last(), Some("POP=80.0 RAIN3H=0.0"));
}

#[test]
fn dry_weather_turns_the_pump_on() {
    let dir = tempfile::tempdir().unwrap();
    write_table(
        dir.path(),
        &format!("{HEADER}2024-05-01 12:00:00,\"Curitiba,BR\",25.0,40,0.0,0.1,clear sky\n"),
    );

    let output = run(dir.path(), &["  Curitiba,BR  "]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("pump ON"));
    assert_eq!(stdout(&output).lines().last(), Some("POP=10.0 RAIN3H=0.0"));
}

#[test]
fn unknown_city_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_table(
        dir.path(),
        &format!("{HEADER}2024-05-01 12:00:00,\"Curitiba,BR\",18.2,80,0.0,0.8,rain\n"),
    );

    let output = run(dir.path(), &["Atlantis,XX"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!stdout(&output).contains("POP="));
    assert!(stderr(&output).contains("Atlantis,XX"));
}

#[test]
fn missing_data_file_fails() {
    let dir = tempfile::tempdir().unwrap();

    let output = run(dir.path(), &["Curitiba,BR"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).contains("not found"));
}

#[test]
fn missing_argument_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_table(
        dir.path(),
        &format!("{HEADER}2024-05-01 12:00:00,\"Curitiba,BR\",18.2,80,0.0,0.8,rain\n"),
    );

    let output = run(dir.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).contains("usage"));
}

#[test]
fn missing_city_column_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_table(dir.path(), "ts,city,pop,rain_3h\n2024-05-01 12:00:00,Lima,0.1,0\n");

    let output = run(dir.path(), &["Lima"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!stdout(&output).contains("POP="));
    assert!(stderr(&output).contains("city_query"));
}

#[test]
fn garbage_probability_with_rain_fallen() {
    let dir = tempfile::tempdir().unwrap();
    write_table(
        dir.path(),
        &format!("{HEADER}2024-05-01 12:00:00,\"Curitiba,BR\",18.2,90,2.5,soon,rain\n"),
    );

    let output = run(dir.path(), &["Curitiba,BR"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("OFF"));
    assert_eq!(stdout(&output).lines().last(), Some("POP=0.0 RAIN3H=2.5"));
}

#[test]
fn malformed_table_fails() {
    let too_many_fields = format!("{HEADER}2024-05-01 12:00:00,Lima,18.2,90,2.5,0.1,rain,extra\n");
    let unterminated_quote = format!("{HEADER}2024-05-01 12:00:00,\"Lima,18.2,90,2.5,0.1,rain\n");

    for table in [too_many_fields, unterminated_quote] {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), &table);

        let output = run(dir.path(), &["Lima"]);
        assert_eq!(output.status.code(), Some(1), "table: {table:?}");
        assert!(!stdout(&output).contains("POP="));
    }
}

#[test]
fn extra_arguments_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    write_table(
        dir.path(),
        &format!("{HEADER}2024-05-01 12:00:00,Lima,22.0,60,0.0,0.1,clear sky\n"),
    );

    let output = run(dir.path(), &["Lima", "extra", "more"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).lines().last(), Some("POP=10.0 RAIN3H=0.0"));
}

#[test]
fn unknown_flag_fails_with_status_1() {
    let dir = tempfile::tempdir().unwrap();
    write_table(
        dir.path(),
        &format!("{HEADER}2024-05-01 12:00:00,Lima,22.0,60,0.0,0.1,clear sky\n"),
    );

    let output = run(dir.path(), &["--bogus", "Lima"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!stdout(&output).contains("POP="));
}

#[test]
fn blank_city_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_table(
        dir.path(),
        &format!("{HEADER}2024-05-01 12:00:00,,22.0,60,0.0,0.9,clear sky\n"),
    );

    let output = run(dir.path(), &["   "]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!stdout(&output).contains("POP="));
}

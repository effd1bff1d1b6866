use assert_cmd::Command;
use predicates::prelude::*;

fn accrebuild() -> Command {
    Command::cargo_bin("accrebuild").expect("binary builds")
}

#[test]
fn missing_input_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    accrebuild()
        .arg("--input-file")
        .arg(dir.path().join("nope.accdb"))
        .arg("--working-root")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"))
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn input_file_is_required() {
    accrebuild()
        .assert()
        .failure()
        .stderr(predicate::str::contains("--input-file"));
}

#[test]
fn help_lists_the_rebuild_flags() {
    accrebuild()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--create-new-db"))
        .stdout(predicate::str::contains("--download-script"))
        .stdout(predicate::str::contains("--export-table-data"));
}

#[test]
fn version_flag_works() {
    accrebuild()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("accrebuild"));
}

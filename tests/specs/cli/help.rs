//! Black-box CLI specs: help and version surfaces.

use assert_cmd::Command;

fn stdout_of(assert: assert_cmd::assert::Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stdout).into_owned()
}

#[test]
fn dw_help_lists_subcommands() {
    let assert = Command::cargo_bin("dw").unwrap().arg("--help").assert().success();
    let stdout = stdout_of(assert);
    for subcommand in ["run", "proc", "session", "daemon"] {
        assert!(stdout.contains(subcommand), "help should mention {subcommand}");
    }
}

#[test]
fn dw_version_prints() {
    let assert = Command::cargo_bin("dw")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
    assert!(stdout_of(assert).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn dwd_version_prints() {
    let assert = Command::cargo_bin("dwd")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
    assert!(stdout_of(assert).contains("dwd"));
}

#[test]
fn dwd_rejects_unknown_arguments() {
    Command::cargo_bin("dwd")
        .unwrap()
        .arg("--bogus")
        .assert()
        .failure()
        .code(1);
}

use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn taskpool_help_works() {
    Command::cargo_bin("taskpool")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("supervised task pool"));
}

#[test]
fn subcommand_help_works() {
    let subcommands = [
        "template",
        "instantiate",
        "adhoc",
        "list",
        "show",
        "assign",
        "start",
        "submit",
        "verify",
        "reject",
        "giveup",
        "unassign",
        "update",
        "rm",
        "balance",
        "sweep",
    ];

    for cmd in subcommands {
        Command::cargo_bin("taskpool")
            .expect("binary")
            .arg(cmd)
            .arg("--help")
            .assert()
            .success();
    }
}

#[test]
fn list_requires_a_scope() {
    let dir = tempfile::tempdir().expect("tempdir");
    Command::cargo_bin("taskpool")
        .expect("binary")
        .env("TASKPOOL_ROOT", dir.path())
        .arg("list")
        .assert()
        .failure();
}

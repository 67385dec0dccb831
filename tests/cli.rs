use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn help_exits_successfully() {
    Command::cargo_bin("profiling-operator")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("ProfilingConfig"));
}

#[test]
fn crdgen_prints_the_custom_resource_definition() {
    Command::cargo_bin("profiling-operator")
        .unwrap()
        .arg("crdgen")
        .assert()
        .success()
        .stdout(contains("kind: CustomResourceDefinition"))
        .stdout(contains("group: profiling.k8s.dev"))
        .stdout(contains("shortNames:"));
}

#[test]
fn missing_subcommand_is_rejected() {
    Command::cargo_bin("profiling-operator")
        .unwrap()
        .assert()
        .failure();
}

#[path = "common/mod.rs"]
mod common;

use common::{Project, ServiceDef, service_status, wait_for_listening};
use lifecycle::probe;
use predicates::prelude::*;
use serde_json::json;

#[test]
#[ignore]
fn listener_helper() {
    common::run_listener_helper();
}

#[test]
fn help_prints_usage_for_both_entry_points() {
    let project = Project::new();
    project.write_config(&[ServiceDef::listener("api")]);

    project
        .start(&["help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: lifecycle-start"));
    project
        .stop(&["help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: lifecycle-stop"));
    assert!(!project.ledger().exists());
}

#[test]
fn status_without_ledger_exits_zero() {
    let project = Project::new();
    project.write_config(&[ServiceDef::listener("api"), ServiceDef::listener("mcp")]);

    project
        .start(&["status", "--no-color"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("No processes tracked")
                .and(predicate::str::contains("● api (port"))
                .and(predicate::str::contains("● mcp (port"))
                .and(predicate::str::contains("\x1b[").not()),
        );
    project.stop(&["status"]).assert().success();
}

#[test]
fn unknown_verb_falls_back_to_default_action() {
    let project = Project::new();
    project.write_config(&[ServiceDef::listener("api")]);

    project
        .stop(&["halt-everything"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to stop."))
        .stderr(predicate::str::contains("Unrecognised command 'halt-everything'"));

    let api = ServiceDef::listener("api");
    let port = api.port;
    project.write_config(&[api]);
    project
        .start(&["launch"])
        .assert()
        .success()
        .stderr(predicate::str::contains("running 'start'"));
    wait_for_listening(port);
    assert_eq!(project.ledger_pids().len(), 1);

    project.stop(&[]).assert().success();
}

#[test]
fn duplicate_ports_abort_before_anything_spawns() {
    let project = Project::new();
    let api = ServiceDef::listener("api");
    let mut mcp = ServiceDef::listener("mcp");
    mcp.port = api.port;
    project.write_config(&[api, mcp]);

    project
        .start(&["start"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("declared by both 'api' and 'mcp'"));

    assert!(!project.ledger().exists());
    assert!(!project.path().join("logs").exists());
}

#[test]
fn failed_launch_still_starts_the_rest() {
    let project = Project::new();
    let broken = ServiceDef::with_command("broken", json!(["/nonexistent/lifecycle-service"]));
    let api = ServiceDef::listener("api");
    let port = api.port;
    project.write_config(&[broken, api]);

    project
        .start(&["start"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to start service 'broken'"));
    wait_for_listening(port);

    let report = project.status_json();
    assert_eq!(service_status(&report, "broken")["process"]["state"], "stopped");
    assert_eq!(service_status(&report, "api")["process"]["state"], "running");

    project.stop(&[]).assert().success();
    assert!(!probe::is_listening(port));
}

#[test]
fn health_flag_probes_listening_endpoints() {
    let project = Project::new();
    let api = ServiceDef::listener("api");
    let port = api.port;
    project.write_config(&[api]);

    project.start(&[]).assert().success();
    wait_for_listening(port);

    let output = project
        .stop(&["status", "--json", "--health"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let api = service_status(&report, "api");
    assert_eq!(api["endpoint"]["state"], "healthy");
    assert_eq!(api["endpoint"]["code"], 200);

    project
        .start(&["status", "--health"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Endpoint: healthy"));

    project.stop(&[]).assert().success();
}

#[test]
fn port_overrides_come_from_the_environment() {
    let project = Project::new();
    let api = ServiceDef::listener("api");
    let declared = api.port;
    project.write_config(&[api]);
    let overridden = common::free_port();

    project
        .start(&["start"])
        .env("LIFECYCLE_TEST_API_PORT", overridden.to_string())
        .assert()
        .success();
    wait_for_listening(overridden);
    assert!(!probe::is_listening(declared));

    project
        .stop(&[])
        .env("LIFECYCLE_TEST_API_PORT", overridden.to_string())
        .assert()
        .success();
    assert!(!probe::is_listening(overridden));
}

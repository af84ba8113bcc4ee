#[path = "common/mod.rs"]
mod common;

use std::{fs, process::Command as StdCommand};

use common::{
    Project, ServiceDef, listener_argv, service_status, spawn_untracked_listener, wait_for_listening,
    wait_for_port_free, wait_for_process_exit,
};
use lifecycle::{probe, process::is_alive};
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use predicates::prelude::*;
use serde_json::json;

#[test]
#[ignore]
fn listener_helper() {
    common::run_listener_helper();
}

fn exited_pid() -> u32 {
    let mut child = StdCommand::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

#[test]
fn start_status_kill_and_stop_scenario() {
    let project = Project::new();
    let api = ServiceDef::listener("api");
    let mcp = ServiceDef::listener("mcp");
    let (api_port, mcp_port) = (api.port, mcp.port);
    project.write_config(&[api, mcp]);

    project.start(&["start"]).assert().success();
    wait_for_listening(api_port);
    wait_for_listening(mcp_port);

    let pids = project.ledger_pids();
    assert_eq!(pids.len(), 2);

    let report = project.status_json();
    assert_eq!(report["tracked"], true);
    for name in ["api", "mcp"] {
        let service = service_status(&report, name);
        assert_eq!(service["process"]["state"], "running");
        assert_eq!(service["port_status"], "listening");
    }

    let api_pid = service_status(&report, "api")["pid"].as_u64().unwrap() as u32;
    kill(Pid::from_raw(api_pid as i32), Signal::SIGKILL).unwrap();
    wait_for_port_free(api_port);

    let report = project.status_json();
    let api = service_status(&report, "api");
    assert_eq!(api["process"]["state"], "stale");
    assert_eq!(api["port_status"], "not-listening");
    let mcp = service_status(&report, "mcp");
    assert_eq!(mcp["process"]["state"], "running");
    assert_eq!(mcp["port_status"], "listening");

    project.stop(&["stop"]).assert().success();

    assert!(!project.ledger().exists());
    assert!(!probe::is_listening(api_port));
    assert!(!probe::is_listening(mcp_port));
    for pid in pids {
        wait_for_process_exit(pid);
    }
}

#[test]
fn stop_twice_is_idempotent() {
    let project = Project::new();
    let web = ServiceDef::listener("web");
    let port = web.port;
    project.write_config(&[web]);

    project.start(&[]).assert().success();
    wait_for_listening(port);

    project
        .stop(&[])
        .assert()
        .success()
        .stdout(predicate::str::contains("● web (PID"));
    assert!(!project.ledger().exists());
    assert!(!probe::is_listening(port));

    project
        .stop(&["stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to stop."));
    assert!(!project.ledger().exists());
    assert!(!probe::is_listening(port));
}

#[test]
fn status_never_changes_ledger_or_processes() {
    let project = Project::new();
    let api = ServiceDef::listener("api");
    let port = api.port;
    project.write_config(&[api]);

    project.start(&["start"]).assert().success();
    wait_for_listening(port);

    let before = fs::read(project.ledger().path()).unwrap();
    let pids = project.ledger_pids();

    for _ in 0..3 {
        project.start(&["status"]).assert().success();
        project.stop(&["status", "--verbose"]).assert().success();
        project.start(&["status", "--json", "--health"]).assert().success();
    }

    assert_eq!(fs::read(project.ledger().path()).unwrap(), before);
    assert!(pids.iter().all(|pid| is_alive(*pid)));
    assert!(probe::is_listening(port));

    project.stop(&[]).assert().success();
}

#[test]
fn legacy_ledger_is_attributed_by_position() {
    let project = Project::new();
    project.write_config(&[
        ServiceDef::listener("a"),
        ServiceDef::listener("b"),
        ServiceDef::listener("c"),
    ]);

    let pid_a = exited_pid();
    let mut live_b = StdCommand::new("sleep").arg("30").spawn().unwrap();
    let pid_c = exited_pid();

    fs::write(
        project.ledger().path(),
        format!("{pid_a}\n{}\n{pid_c}\n", live_b.id()),
    )
    .unwrap();

    let report = project.status_json();
    let b = service_status(&report, "b");
    assert_eq!(b["pid"], live_b.id());
    assert_eq!(b["process"]["state"], "running");
    assert_eq!(service_status(&report, "a")["pid"], pid_a);
    assert_eq!(service_status(&report, "a")["process"]["state"], "stale");
    assert_eq!(service_status(&report, "c")["pid"], pid_c);
    assert_eq!(service_status(&report, "c")["process"]["state"], "stale");
    assert!(report["unattributed"].as_array().unwrap().is_empty());

    project.stop(&[]).assert().success();
    live_b.wait().unwrap();
    assert!(!project.ledger().exists());
}

#[test]
fn stop_frees_ports_held_by_untracked_processes() {
    let project = Project::new();
    let api = ServiceDef::listener("api");
    let port = api.port;
    project.write_config(&[api]);

    let mut orphan = spawn_untracked_listener(port);
    wait_for_listening(port);
    assert!(!project.ledger().exists());

    let report = project.status_json();
    let api = service_status(&report, "api");
    assert_eq!(api["process"]["state"], "stopped");
    assert_eq!(api["port_status"], "listening");
    assert_eq!(api["mismatch"], "untracked-listener");

    project
        .stop(&[])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("● port {port} (api): freed")));

    orphan.wait().unwrap();
    assert!(!probe::is_listening(port));
}

#[test]
fn restart_launches_fresh_processes() {
    let project = Project::new();
    let one = ServiceDef::listener("one");
    let two = ServiceDef::listener("two");
    let ports = [one.port, two.port];
    project.write_config(&[one, two]);

    project.start(&["start"]).assert().success();
    ports.iter().for_each(|port| wait_for_listening(*port));
    let before = project.ledger_pids();

    project.start(&["restart"]).assert().success();
    ports.iter().for_each(|port| wait_for_listening(*port));
    let after = project.ledger_pids();

    assert_eq!(after.len(), 2);
    assert!(before.iter().all(|pid| !after.contains(pid)));
    for pid in &before {
        wait_for_process_exit(*pid);
    }

    project.stop(&[]).assert().success();
}

#[test]
fn start_replaces_whatever_holds_a_declared_port() {
    let project = Project::new();
    let api = ServiceDef::listener("api");
    let port = api.port;
    project.write_config(&[api]);

    let mut squatter = spawn_untracked_listener(port);
    wait_for_listening(port);

    project.start(&["start"]).assert().success();
    squatter.wait().unwrap();
    wait_for_listening(port);

    let ledger = project.ledger().read_all().unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].service(), Some("api"));
    assert_ne!(ledger[0].pid(), squatter.id());

    project.stop(&[]).assert().success();
    assert!(!probe::is_listening(port));
}

#[test]
fn named_records_survive_registry_reordering() {
    let project = Project::new();
    let first = ServiceDef::listener("first");
    let second = ServiceDef::listener("second");
    let port_first = first.port;
    let port_second = second.port;
    project.write_config(&[first, second]);

    project.start(&[]).assert().success();
    wait_for_listening(port_first);
    wait_for_listening(port_second);
    let recorded = project.ledger().read_all().unwrap();

    // Same services, declared in the opposite order.
    project.write_config(&[
        ServiceDef {
            name: "second".into(),
            port: port_second,
            command: json!(listener_argv()),
        },
        ServiceDef {
            name: "first".into(),
            port: port_first,
            command: json!(listener_argv()),
        },
    ]);

    let report = project.status_json();
    for entry in &recorded {
        let name = entry.service().unwrap();
        assert_eq!(service_status(&report, name)["pid"], entry.pid());
    }

    project.stop(&[]).assert().success();
}

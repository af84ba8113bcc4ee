#![allow(dead_code)]

use std::{
    env, fs,
    io::{Read, Write},
    net::TcpListener,
    path::{Path, PathBuf},
    process::Command as StdCommand,
    thread,
    time::{Duration, Instant},
};

use assert_cmd::Command;
use lifecycle::{
    ledger::{Ledger, LedgerEntry},
    probe,
    process::is_alive,
};
use serde_json::{Value, json};
use tempfile::TempDir;

/// Variable that turns the ignored `listener_helper` test into a long-running TCP service.
pub const LISTENER_ENV: &str = "LIFECYCLE_TEST_LISTENER";

/// Name of the ignored test each integration binary declares to act as a service.
pub const LISTENER_TEST: &str = "listener_helper";

/// Body of the `listener_helper` test: binds `127.0.0.1:$PORT` and answers every connection with
/// `200 OK` until killed. Does nothing unless [`LISTENER_ENV`] is set.
pub fn run_listener_helper() {
    if env::var_os(LISTENER_ENV).is_none() {
        return;
    }

    let port: u16 = env::var("PORT")
        .expect("PORT must be set for the listener helper")
        .parse()
        .expect("PORT must be numeric");
    let listener = TcpListener::bind(("127.0.0.1", port)).expect("listener helper failed to bind");
    println!("listening on {port}");

    for stream in listener.incoming() {
        let Ok(mut stream) = stream else { continue };
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf);
        let _ = stream.write_all(
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
        );
    }
}

/// Argv that runs the listener helper from the current test binary.
pub fn listener_argv() -> Vec<String> {
    let exe = env::current_exe().expect("test binary path");
    vec![
        exe.display().to_string(),
        LISTENER_TEST.to_string(),
        "--exact".to_string(),
        "--ignored".to_string(),
        "--nocapture".to_string(),
        "--test-threads=1".to_string(),
    ]
}

/// Shell command line equivalent of [`listener_argv`].
pub fn listener_shell_command() -> String {
    listener_argv()
        .iter()
        .map(|part| format!("'{part}'"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Spawns the listener helper directly from the test process, outside of any ledger.
pub fn spawn_untracked_listener(port: u16) -> std::process::Child {
    let argv = listener_argv();
    StdCommand::new(&argv[0])
        .args(&argv[1..])
        .env(LISTENER_ENV, "1")
        .env("PORT", port.to_string())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .expect("failed to spawn untracked listener")
}

/// Port that was free a moment ago.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("failed to bind ephemeral port")
        .local_addr()
        .expect("ephemeral port address")
        .port()
}

/// A service declaration for [`Project::write_config`].
pub struct ServiceDef {
    pub name: String,
    pub port: u16,
    pub command: Value,
}

impl ServiceDef {
    /// Service backed by the listener helper.
    pub fn listener(name: &str) -> Self {
        Self {
            name: name.to_string(),
            port: free_port(),
            command: json!(listener_argv()),
        }
    }

    /// Service with an arbitrary argv or shell command.
    pub fn with_command(name: &str, command: Value) -> Self {
        Self {
            name: name.to_string(),
            port: free_port(),
            command,
        }
    }
}

/// A temporary project directory holding a registry, logs and the ledger.
pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("lifecycle.yaml")
    }

    pub fn ledger(&self) -> Ledger {
        Ledger::new(self.path().join(".lifecycle.pids"))
    }

    /// Writes the registry. JSON is valid YAML, which sidesteps quoting of binary paths.
    pub fn write_config(&self, services: &[ServiceDef]) {
        let services: Vec<Value> = services
            .iter()
            .map(|service| {
                json!({
                    "name": service.name,
                    "command": service.command,
                    "port": service.port,
                    "env": { "LIFECYCLE_TEST_LISTENER": "1" },
                })
            })
            .collect();

        let document = json!({
            "env_prefix": "LIFECYCLE_TEST",
            "settle_delay": "0s",
            "grace_period": "1s",
            "services": services,
        });

        fs::write(
            self.config_path(),
            serde_json::to_string_pretty(&document).expect("config serialises"),
        )
        .expect("failed to write config");
    }

    fn command(&self, bin: &str, args: &[&str]) -> Command {
        let mut cmd = Command::new(match bin {
            "lifecycle-start" => assert_cmd::cargo::cargo_bin!("lifecycle-start"),
            _ => assert_cmd::cargo::cargo_bin!("lifecycle-stop"),
        });
        cmd.current_dir(self.path())
            .args(args)
            .timeout(Duration::from_secs(30));
        cmd
    }

    pub fn start(&self, args: &[&str]) -> Command {
        self.command("lifecycle-start", args)
    }

    pub fn stop(&self, args: &[&str]) -> Command {
        self.command("lifecycle-stop", args)
    }

    /// Runs `status --json` and parses the report.
    pub fn status_json(&self) -> Value {
        let output = self
            .start(&["status", "--json"])
            .output()
            .expect("failed to run status");
        assert!(output.status.success(), "status exited with {:?}", output.status);
        serde_json::from_slice(&output.stdout).expect("status emits JSON")
    }

    /// PIDs currently recorded in the ledger.
    pub fn ledger_pids(&self) -> Vec<u32> {
        self.ledger()
            .read_all()
            .expect("ledger readable")
            .iter()
            .map(LedgerEntry::pid)
            .collect()
    }
}

/// Looks up one service in a parsed status report.
pub fn service_status<'a>(report: &'a Value, name: &str) -> &'a Value {
    report["services"]
        .as_array()
        .expect("services array")
        .iter()
        .find(|service| service["name"] == name)
        .unwrap_or_else(|| panic!("service '{name}' missing from status"))
}

pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if condition() {
            return;
        }
        if Instant::now() >= deadline {
            panic!("Timed out waiting for {what}");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

pub fn wait_for_listening(port: u16) {
    wait_until(&format!("port {port} to listen"), || probe::is_listening(port));
}

pub fn wait_for_port_free(port: u16) {
    wait_until(&format!("port {port} to be released"), || {
        !probe::is_listening(port)
    });
}

pub fn wait_for_process_exit(pid: u32) {
    wait_until(&format!("PID {pid} to exit"), || !is_alive(pid));
}

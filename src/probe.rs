//! Port probing based on observable OS state only.
//!
//! Probes never consult the ledger, so they also see orphans and services started by hand.
//! If no source of socket information is available the port is reported as not listening.
use std::process::Command;
use tracing::debug;

/// Whether any socket is listening on `port`.
pub fn is_listening(port: u16) -> bool {
    match socket_listeners(port) {
        Some(pids) => !pids.is_empty(),
        None => {
            debug!("No socket information available for port {port}; assuming not listening");
            false
        }
    }
}

/// PIDs holding a listening socket on `port`, sorted and deduplicated.
pub fn listeners(port: u16) -> Vec<u32> {
    socket_listeners(port).unwrap_or_default()
}

/// Listening PIDs from the OS socket table, falling back to `lsof`. `None` if neither works.
fn socket_listeners(port: u16) -> Option<Vec<u32>> {
    match ::listeners::get_all() {
        Ok(all) => {
            let mut pids: Vec<u32> = all
                .into_iter()
                .filter(|listener| listener.socket.port() == port)
                .map(|listener| listener.process.pid)
                .collect();
            pids.sort_unstable();
            pids.dedup();
            Some(pids)
        }
        Err(err) => {
            debug!("Unable to enumerate listening sockets: {err}; trying lsof");
            lsof_listeners(port)
        }
    }
}

/// Asks `lsof` for listeners. `None` means lsof is unavailable.
fn lsof_listeners(port: u16) -> Option<Vec<u32>> {
    let output = match Command::new("lsof")
        .args(["-nP", &format!("-iTCP:{port}"), "-sTCP:LISTEN", "-t"])
        .output()
    {
        Ok(output) => output,
        Err(err) => {
            debug!("lsof unavailable while probing port {port}: {err}");
            return None;
        }
    };

    // lsof exits non-zero when nothing matches.
    let mut pids: Vec<u32> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    Some(pids)
}

//! Process inspection and signalling.
use nix::{
    errno::Errno,
    sys::{
        signal::{self, Signal},
        wait::{WaitPidFlag, waitpid},
    },
    unistd::{Pid, getpgid},
};
use sysinfo::{Pid as SysPid, ProcessesToUpdate, System};
use tracing::{debug, warn};

#[cfg(target_os = "linux")]
use std::fs;

/// Observed liveness of a PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// The process exists and has not exited.
    Running,
    /// The process exited but has not been reaped by its parent.
    Zombie,
    /// No such process.
    Missing,
    /// Liveness could not be determined.
    Unknown,
}

impl ProcessState {
    /// Whether the process should be treated as still holding resources.
    pub fn is_alive(self) -> bool {
        matches!(self, ProcessState::Running | ProcessState::Unknown)
    }
}

fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
}

/// Probes `pid` without side effects on the target.
///
/// If `pid` is a child of the current process it is reaped first, so a process launched and
/// killed by the same long-lived caller does not linger as a zombie.
pub fn process_state(pid: u32) -> ProcessState {
    let Some(target) = to_pid(pid) else {
        return ProcessState::Missing;
    };

    reap(target);

    match signal::kill(target, None) {
        Ok(()) => {}
        // Exists but belongs to another user.
        Err(Errno::EPERM) => {}
        Err(Errno::ESRCH) => return ProcessState::Missing,
        Err(err) => {
            debug!("Unable to probe PID {pid}: {err}");
            return ProcessState::Unknown;
        }
    }

    if is_zombie(pid) {
        ProcessState::Zombie
    } else {
        ProcessState::Running
    }
}

/// Convenience wrapper over [`process_state`].
pub fn is_alive(pid: u32) -> bool {
    process_state(pid).is_alive()
}

fn reap(target: Pid) {
    // ECHILD for anything we did not spawn ourselves.
    let _ = waitpid(target, Some(WaitPidFlag::WNOHANG));
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };

    // The command name is wrapped in parentheses and may contain spaces; the state follows the
    // last ')'.
    stat.rfind(')')
        .and_then(|idx| stat[idx + 1..].trim_start().chars().next())
        .is_some_and(|state| matches!(state, 'Z' | 'X'))
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(pid: u32) -> bool {
    let mut system = System::new();
    let target = SysPid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system
        .process(target)
        .is_some_and(|process| process.status() == sysinfo::ProcessStatus::Zombie)
}

/// Short OS process name (e.g. `python3`), if the process is visible.
pub fn process_name(pid: u32) -> Option<String> {
    let mut system = System::new();
    let target = SysPid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system
        .process(target)
        .map(|process| process.name().to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
}

/// Full command line of the process, if visible.
pub fn process_command(pid: u32) -> Option<String> {
    let mut system = System::new();
    let target = SysPid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    let process = system.process(target)?;
    let cmdline = process
        .cmd()
        .iter()
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");

    if cmdline.trim().is_empty() {
        None
    } else {
        Some(cmdline)
    }
}

/// Sends `signal` to `pid`, and to its whole process group when `pid` leads a group other than
/// our own. Ordinary members of someone else's group are signalled alone.
///
/// Returns `Ok(false)` if the process was already gone.
pub fn signal_tree(pid: u32, signal: Signal) -> Result<bool, Errno> {
    let Some(target) = to_pid(pid) else {
        return Ok(false);
    };

    let own_group = getpgid(None).ok();
    if let Ok(group) = getpgid(Some(target))
        && group == target
        && group.as_raw() > 1
        && Some(group) != own_group
    {
        match signal::killpg(group, signal) {
            Ok(()) => debug!("Sent {signal} to process group {group}"),
            Err(Errno::ESRCH) => {}
            Err(Errno::EPERM) => warn!(
                "Insufficient permissions to signal process group {group}; falling back to direct signal"
            ),
            Err(err) => return Err(err),
        }
    }

    match signal::kill(target, signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(err) => Err(err),
    }
}

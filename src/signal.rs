//! Best-effort completion notification to a supervising process.

use std::fmt;

use serde::Deserialize;
use tracing::{info, warn};

/// Signals a supervisor may ask to receive when the run is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum CompletionSignal {
    #[default]
    #[serde(rename = "SIGUSR1", alias = "USR1")]
    Usr1,
    #[serde(rename = "SIGUSR2", alias = "USR2")]
    Usr2,
    #[serde(rename = "SIGINT", alias = "INT")]
    Int,
    #[serde(rename = "SIGTERM", alias = "TERM")]
    Term,
    #[serde(rename = "SIGHUP", alias = "HUP")]
    Hup,
}

impl CompletionSignal {
    pub fn name(&self) -> &'static str {
        match self {
            CompletionSignal::Usr1 => "SIGUSR1",
            CompletionSignal::Usr2 => "SIGUSR2",
            CompletionSignal::Int => "SIGINT",
            CompletionSignal::Term => "SIGTERM",
            CompletionSignal::Hup => "SIGHUP",
        }
    }

    #[cfg(unix)]
    fn as_raw(&self) -> libc::c_int {
        match self {
            CompletionSignal::Usr1 => libc::SIGUSR1,
            CompletionSignal::Usr2 => libc::SIGUSR2,
            CompletionSignal::Int => libc::SIGINT,
            CompletionSignal::Term => libc::SIGTERM,
            CompletionSignal::Hup => libc::SIGHUP,
        }
    }
}

impl fmt::Display for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Sent,
    ProcessNotFound,
    PermissionDenied,
    /// Any other OS error, with its errno.
    Failed(i32),
    /// The platform has no process signals.
    Unsupported,
}

/// Deliver `signal` to `pid`. Never fails the caller; every outcome is logged.
pub fn notify(pid: u32, signal: CompletionSignal) -> SignalOutcome {
    let outcome = deliver(pid, signal);
    match outcome {
        SignalOutcome::Sent => info!("Sent {} to PID {}", signal, pid),
        SignalOutcome::ProcessNotFound => warn!("Process {} not found", pid),
        SignalOutcome::PermissionDenied => warn!("Permission denied to signal PID {}", pid),
        SignalOutcome::Failed(errno) => warn!("Failed to signal PID {} (errno {})", pid, errno),
        SignalOutcome::Unsupported => warn!("Process signals are not supported on this platform"),
    }
    outcome
}

#[cfg(unix)]
fn deliver(pid: u32, signal: CompletionSignal) -> SignalOutcome {
    // 0 and negative values address process groups, never a single process.
    let pid = match libc::pid_t::try_from(pid) {
        Ok(pid) if pid > 0 => pid,
        _ => return SignalOutcome::ProcessNotFound,
    };

    if unsafe { libc::kill(pid, signal.as_raw()) } == 0 {
        return SignalOutcome::Sent;
    }

    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => SignalOutcome::ProcessNotFound,
        Some(libc::EPERM) => SignalOutcome::PermissionDenied,
        Some(errno) => SignalOutcome::Failed(errno),
        None => SignalOutcome::Failed(0),
    }
}

#[cfg(not(unix))]
fn deliver(_pid: u32, _signal: CompletionSignal) -> SignalOutcome {
    SignalOutcome::Unsupported
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;

    use super::*;

    #[test]
    fn missing_process_is_reported_not_raised() {
        // Above any Linux pid_max, so never a live process.
        assert_eq!(
            notify(i32::MAX as u32, CompletionSignal::Usr1),
            SignalOutcome::ProcessNotFound
        );
    }

    #[test]
    fn group_addressing_pids_are_refused() {
        assert_eq!(notify(0, CompletionSignal::Term), SignalOutcome::ProcessNotFound);
        assert_eq!(notify(u32::MAX, CompletionSignal::Term), SignalOutcome::ProcessNotFound);
    }

    #[test]
    fn delivers_to_live_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        assert_eq!(notify(child.id(), CompletionSignal::Usr2), SignalOutcome::Sent);
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGUSR2));
    }

    #[test]
    fn parses_names_and_aliases() {
        #[derive(Deserialize)]
        struct Wrapper {
            name: CompletionSignal,
        }
        let parsed: Wrapper = toml::from_str("name = \"USR2\"").unwrap();
        assert_eq!(parsed.name, CompletionSignal::Usr2);
        let parsed: Wrapper = toml::from_str("name = \"SIGHUP\"").unwrap();
        assert_eq!(parsed.name, CompletionSignal::Hup);
    }
}

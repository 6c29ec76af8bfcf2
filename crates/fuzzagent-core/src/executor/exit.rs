//! Exit-code disambiguation.
//!
//! The supervisor inside the user container reports the process exit code on
//! stdout and uses its own exit code to describe how the run ended. Some of
//! those codes are ambiguous because the supervisor itself may have been
//! killed; those are resolved from the container's terminated state, which
//! carries the resource monitor's exit code.

use crate::cluster::ContainerState;

/// Supervisor: wall-clock limit reached.
pub const RUNNER_TIME_LIMIT: i32 = 101;
/// Supervisor: terminated by the monitor.
pub const RUNNER_TERMINATED: i32 = 102;
/// 128 + SIGKILL
pub const RUNNER_SIGKILL: i32 = 137;
/// 128 + SIGTERM
pub const RUNNER_SIGTERM: i32 = 143;

/// Monitor: tmpfs usage exceeded.
pub const MONITOR_TMPFS_LIMIT: i32 = 101;
/// Monitor: run aborted.
pub const MONITOR_ABORTED: i32 = 102;

const OOM_KILLED: &str = "oomkilled";

/// What the supervisor's own exit code says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerExit {
    /// Supervisor finished; the process exit code is on stdout
    Completed,
    TimeLimit,
    /// Supervisor stopped from outside; container state decides
    Ambiguous(i32),
    /// Supervisor failed on its own
    Failed(i32),
}

pub fn classify_runner_exit(code: i32) -> RunnerExit {
    match code {
        0 => RunnerExit::Completed,
        RUNNER_TIME_LIMIT => RunnerExit::TimeLimit,
        RUNNER_TERMINATED | RUNNER_SIGKILL | RUNNER_SIGTERM => RunnerExit::Ambiguous(code),
        other => RunnerExit::Failed(other),
    }
}

/// What the container's state says about an ambiguous supervisor exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Container still running or waiting
    NotTerminated(&'static str),
    TmpfsLimit,
    Aborted,
    RamLimit,
    Unknown {
        exit_code: i32,
        reason: Option<String>,
    },
}

pub fn classify_termination(state: &ContainerState) -> Termination {
    match state {
        ContainerState::Terminated { exit_code, reason } => match *exit_code {
            MONITOR_TMPFS_LIMIT => Termination::TmpfsLimit,
            MONITOR_ABORTED => Termination::Aborted,
            code => {
                let oom = reason
                    .as_deref()
                    .is_some_and(|r| r.trim().eq_ignore_ascii_case(OOM_KILLED));
                if oom {
                    Termination::RamLimit
                } else {
                    Termination::Unknown {
                        exit_code: code,
                        reason: reason.clone(),
                    }
                }
            }
        },
        other => Termination::NotTerminated(other.label()),
    }
}

/// Parse the process exit code the supervisor printed on stdout.
pub fn parse_process_exit(stdout: &str) -> Option<i32> {
    stdout.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminated(exit_code: i32, reason: Option<&str>) -> ContainerState {
        ContainerState::Terminated {
            exit_code,
            reason: reason.map(str::to_string),
        }
    }

    #[test]
    fn test_runner_codes() {
        assert_eq!(classify_runner_exit(0), RunnerExit::Completed);
        assert_eq!(classify_runner_exit(101), RunnerExit::TimeLimit);
        for code in [102, 137, 143] {
            assert_eq!(classify_runner_exit(code), RunnerExit::Ambiguous(code));
        }
        assert_eq!(classify_runner_exit(1), RunnerExit::Failed(1));
        assert_eq!(classify_runner_exit(-1), RunnerExit::Failed(-1));
    }

    #[test]
    fn test_monitor_codes() {
        assert_eq!(classify_termination(&terminated(101, None)), Termination::TmpfsLimit);
        assert_eq!(
            classify_termination(&terminated(102, Some("OOMKilled"))),
            Termination::Aborted
        );
        assert_eq!(
            classify_termination(&terminated(137, Some("  OOMKilled \n"))),
            Termination::RamLimit
        );
        assert_eq!(
            classify_termination(&terminated(1, Some("oomkilled"))),
            Termination::RamLimit
        );
        assert_eq!(
            classify_termination(&terminated(137, Some("Error"))),
            Termination::Unknown {
                exit_code: 137,
                reason: Some("Error".into())
            }
        );
        assert!(matches!(
            classify_termination(&terminated(0, None)),
            Termination::Unknown { .. }
        ));
    }

    #[test]
    fn test_live_container_is_not_terminated() {
        assert_eq!(
            classify_termination(&ContainerState::Running),
            Termination::NotTerminated("Running")
        );
        assert_eq!(
            classify_termination(&ContainerState::Waiting { reason: None }),
            Termination::NotTerminated("Waiting")
        );
    }

    #[test]
    fn test_parse_process_exit() {
        assert_eq!(parse_process_exit("7"), Some(7));
        assert_eq!(parse_process_exit(" 77\n"), Some(77));
        assert_eq!(parse_process_exit("-11"), Some(-11));
        assert_eq!(parse_process_exit("abc"), None);
        assert_eq!(parse_process_exit(""), None);
    }
}

//! Command lines and artifacts shared by the libFuzzer modes.

use std::path::Path;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::executor::ExecRequest;
use crate::mode::ModeContext;
use crate::output::CrashRecord;
use crate::transfer::local_files;

/// Largest log tail attached to crashes and launch errors.
const LOG_TAIL_BYTES: usize = 8 * 1024;

/// Extra wall-clock the supervisor allows beyond libFuzzer's own limit.
pub(crate) const SUPERVISOR_SLACK_SEC: u64 = 60;

const ARTIFACT_PREFIXES: [(&str, &str); 4] = [
    ("crash-", "crash"),
    ("oom-", "oom"),
    ("timeout-", "timeout"),
    ("leak-", "leak"),
];

/// Target binary plus the flags every mode passes.
pub(crate) fn base_args(ctx: &ModeContext) -> Vec<String> {
    let target = ctx
        .paths
        .disk_volume()
        .join(&ctx.settings.agent.default_target);
    vec![
        target.display().to_string(),
        format!("-rss_limit_mb={}", ctx.settings.fuzzer.ram_limit),
        format!("-artifact_prefix={}/", ctx.paths.crashes().display()),
    ]
}

/// Exec request running `args` from the disk volume with stderr sent to `log`.
pub(crate) fn request(ctx: &ModeContext, args: Vec<String>, log: &Path, time_limit: u64) -> ExecRequest {
    ExecRequest::new(args, ctx.paths.disk_volume())
        .stderr_file(log)
        .time_limit(time_limit)
}

/// Crash kind encoded in a libFuzzer artifact name.
pub(crate) fn crash_type(file_name: &str) -> Option<&'static str> {
    ARTIFACT_PREFIXES
        .iter()
        .find(|(prefix, _)| file_name.starts_with(prefix))
        .map(|(_, kind)| *kind)
}

/// Turn the artifacts in the crashes directory into crash records.
pub(crate) async fn collect_crashes(ctx: &ModeContext, log: &Path) -> anyhow::Result<Vec<CrashRecord>> {
    let dir = ctx.paths.crashes();
    let output = log_tail(log).await;

    let mut crashes = Vec::new();
    for (name, path) in local_files(&dir)
        .await
        .with_context(|| format!("listing crash artifacts in {}", dir.display()))?
    {
        let Some(kind) = crash_type(&name) else {
            continue;
        };
        let input = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading crash artifact {}", path.display()))?;
        crashes.push(CrashRecord::inline(
            kind,
            STANDARD.encode(input),
            output.clone(),
            false,
        ));
    }
    Ok(crashes)
}

/// Last few kilobytes of a log file. Missing logs read as empty.
pub(crate) async fn log_tail(path: &Path) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let start = bytes.len().saturating_sub(LOG_TAIL_BYTES);
            String::from_utf8_lossy(&bytes[start..]).into_owned()
        }
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_type_from_artifact_name() {
        assert_eq!(crash_type("crash-da39a3ee"), Some("crash"));
        assert_eq!(crash_type("oom-1"), Some("oom"));
        assert_eq!(crash_type("timeout-2"), Some("timeout"));
        assert_eq!(crash_type("leak-3"), Some("leak"));
        assert_eq!(crash_type("slow-unit-4"), None);
        assert_eq!(crash_type("README"), None);
    }

    #[tokio::test]
    async fn test_log_tail_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("fuzzer.log");
        assert_eq!(log_tail(&log).await, "");

        let mut text = "x".repeat(LOG_TAIL_BYTES);
        text.push_str("END");
        std::fs::write(&log, &text).unwrap();
        let tail = log_tail(&log).await;
        assert_eq!(tail.len(), LOG_TAIL_BYTES);
        assert!(tail.ends_with("END"));
    }
}

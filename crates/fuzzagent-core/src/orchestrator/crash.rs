//! Run ids and oversized crash offload.

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::info;
use uuid::Uuid;

use crate::output::CrashRecord;
use crate::transfer::FileTransfer;

const RUN_ID_LEN: usize = 40;
const CRASH_SUFFIX_LEN: usize = 10;

fn random_alnum(len: usize) -> String {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        out.push_str(&Uuid::new_v4().simple().to_string());
    }
    out.truncate(len);
    out
}

/// Fresh 40-character run id.
pub fn generate_run_id() -> String {
    random_alnum(RUN_ID_LEN)
}

/// Storage id for one offloaded crash input.
pub fn crash_input_id(run_id: &str) -> String {
    format!("{run_id}{}", random_alnum(CRASH_SUFFIX_LEN))
}

/// Move the input of `crash` to storage when it exceeds `max_size` base64
/// characters. Returns whether the crash was offloaded.
pub async fn offload_oversized(
    crash: &mut CrashRecord,
    max_size: u64,
    run_id: &str,
    transfer: &FileTransfer,
) -> anyhow::Result<bool> {
    let inline_len = crash.inline_len();
    if inline_len as u64 <= max_size {
        return Ok(false);
    }

    let input = STANDARD
        .decode(crash.input().unwrap_or_default())
        .context("crash input is not valid base64")?;
    let input_id = crash_input_id(run_id);
    transfer.upload_crash(&input_id, &input).await?;
    info!(
        input_id = %input_id,
        inline_len,
        max_size,
        "crash input moved to storage"
    );
    crash.offload(input_id);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fuzzagent_state::fakes::MemoryObjectStorage;

    use crate::error::AgentError;

    fn transfer(storage: Arc<MemoryObjectStorage>, dir: &std::path::Path) -> FileTransfer {
        FileTransfer::new(storage, &crate::fakes::test_settings(dir))
    }

    #[test]
    fn test_ids_have_expected_shape() {
        let run_id = generate_run_id();
        assert_eq!(run_id.len(), 40);
        assert!(run_id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(run_id, generate_run_id());

        let input_id = crash_input_id(&run_id);
        assert_eq!(input_id.len(), 50);
        assert!(input_id.starts_with(&run_id));
    }

    #[tokio::test]
    async fn test_small_crash_stays_inline() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryObjectStorage::new());
        let mut crash = CrashRecord::inline("crash", "QUJD", "", false);

        let moved = offload_oversized(&mut crash, 4, "run", &transfer(storage.clone(), dir.path()))
            .await
            .unwrap();
        assert!(!moved);
        assert_eq!(crash.input(), Some("QUJD"));
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_large_crash_is_uploaded_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryObjectStorage::new());
        let transfer = transfer(storage.clone(), dir.path());
        let mut crash = CrashRecord::inline("oom", "QUJDREVG", "trace", false);

        assert!(offload_oversized(&mut crash, 4, "run", &transfer).await.unwrap());
        let input_id = crash.input_id().unwrap().to_string();
        assert!(input_id.starts_with("run"));
        assert_eq!(crash.input(), None);

        let key = transfer.data_bucket().crash("f", "r", &input_id);
        assert_eq!(storage.object("data", &key).unwrap(), b"ABCDEF");
    }

    #[tokio::test]
    async fn test_upload_failure_is_agent_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryObjectStorage::new());
        storage.fail_writes(true);
        let mut crash = CrashRecord::inline("crash", "QUJDREVG", "", false);

        let err = offload_oversized(&mut crash, 1, "run", &transfer(storage, dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::FileUpload { .. })
        ));
        assert_eq!(crash.input(), Some("QUJDREVG"));
    }
}

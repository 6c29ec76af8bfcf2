//! Exit status carried on the error channel.
//!
//! The control plane writes a status object once the remote command ends:
//!
//! ```text
//! {"metadata":{},"status":"Success"}
//! {"metadata":{},"status":"Failure","reason":"NonZeroExitCode",
//!  "details":{"causes":[{"reason":"ExitCode","message":"137"}]}}
//! ```

use serde::Deserialize;

use super::{TransportError, TransportResult};

#[derive(Debug, Deserialize)]
struct ExecStatus {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<ExecStatusDetails>,
}

#[derive(Debug, Deserialize)]
struct ExecStatusDetails {
    #[serde(default)]
    causes: Vec<ExecStatusCause>,
}

#[derive(Debug, Deserialize)]
struct ExecStatusCause {
    #[serde(default)]
    message: Option<String>,
}

/// Decode an error-channel payload into the remote exit code.
pub fn parse_exit_status(raw: &[u8]) -> TransportResult<i32> {
    let status: ExecStatus = serde_json::from_slice(raw)
        .map_err(|e| TransportError::MalformedStatus(format!("{e}: {}", lossy(raw))))?;

    match status.status.as_str() {
        "Success" => Ok(0),
        "Failure" => {
            let cause = status
                .details
                .as_ref()
                .and_then(|d| d.causes.first())
                .and_then(|c| c.message.as_deref())
                .ok_or_else(|| {
                    TransportError::MalformedStatus(format!(
                        "failure without exit code: {}",
                        status.message.as_deref().unwrap_or("no message")
                    ))
                })?;
            cause.trim().parse::<i32>().map_err(|_| {
                TransportError::MalformedStatus(format!("exit code is not an integer: {cause:?}"))
            })
        }
        other => Err(TransportError::MalformedStatus(format!(
            "unknown status {other:?}"
        ))),
    }
}

fn lossy(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_zero() {
        assert_eq!(
            parse_exit_status(br#"{"metadata":{},"status":"Success"}"#).unwrap(),
            0
        );
    }

    #[test]
    fn test_failure_uses_first_cause() {
        let raw = br#"{"metadata":{},"status":"Failure","message":"command terminated with non-zero exit code","reason":"NonZeroExitCode","details":{"causes":[{"reason":"ExitCode","message":"137"},{"message":"1"}]}}"#;
        assert_eq!(parse_exit_status(raw).unwrap(), 137);
    }

    #[test]
    fn test_malformed_payloads() {
        for raw in [
            &b"not json"[..],
            br#"{"status":"Failure"}"#,
            br#"{"status":"Failure","details":{"causes":[{"message":"abc"}]}}"#,
            br#"{"status":"Pending"}"#,
        ] {
            assert!(matches!(
                parse_exit_status(raw),
                Err(TransportError::MalformedStatus(_))
            ));
        }
    }
}

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("client error {status} for batch [{batch}]")]
    ClientError { batch: String, status: u16 },

    #[error("rate limit exhausted for batch [{batch}] after {attempts} attempts")]
    RateLimitExhausted { batch: String, attempts: u32 },

    #[error(
        "transient failure for batch [{batch}] after {attempts} attempts, last response: {last}"
    )]
    TransientFailure {
        batch: String,
        attempts: u32,
        last: String,
    },

    #[error("malformed payload for batch [{batch}]: {details}")]
    MalformedPayload { batch: String, details: String },

    #[error("run deadline exceeded before batch [{batch}] completed")]
    DeadlineExceeded { batch: String },

    #[error("snapshot write failed for {}: {details}", path.display())]
    WriteFailure { path: PathBuf, details: String },

    #[error("snapshot {} already exists, refusing to overwrite", path.display())]
    SnapshotCollision { path: PathBuf },

    #[error("no snapshot produced, missing identifiers: {}", missing.join(","))]
    NoSnapshot { missing: Vec<String> },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors that end a whole run rather than a single batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::WriteFailure { .. }
                | Error::SnapshotCollision { .. }
                | Error::NoSnapshot { .. }
        )
    }

    /// Short machine-friendly label used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Http(_) => "http",
            Error::ClientError { .. } => "client_error",
            Error::RateLimitExhausted { .. } => "rate_limit_exhausted",
            Error::TransientFailure { .. } => "transient_failure",
            Error::MalformedPayload { .. } => "malformed_payload",
            Error::DeadlineExceeded { .. } => "deadline_exceeded",
            Error::WriteFailure { .. } => "write_failure",
            Error::SnapshotCollision { .. } => "snapshot_collision",
            Error::NoSnapshot { .. } => "no_snapshot",
            Error::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_errors_are_fatal_batch_errors_are_not() {
        let write = Error::WriteFailure {
            path: PathBuf::from("data/snapshots/x.parquet"),
            details: "disk full".into(),
        };
        assert!(write.is_fatal());

        let exhausted = Error::RateLimitExhausted {
            batch: "central".into(),
            attempts: 6,
        };
        assert!(!exhausted.is_fatal());
        assert_eq!(exhausted.kind(), "rate_limit_exhausted");
    }

    #[test]
    fn no_snapshot_lists_missing_identifiers() {
        let err = Error::NoSnapshot {
            missing: vec!["victoria".into(), "central".into()],
        };
        assert_eq!(
            err.to_string(),
            "no snapshot produced, missing identifiers: victoria,central"
        );
    }
}

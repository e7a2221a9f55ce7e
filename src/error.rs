use thiserror::Error;

use crate::pipeline::Violation;

/// Pipeline stage a failure happened in. Carried in errors and log fields so a
/// failed upload can be diagnosed without re-running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Intake,
    Scan,
    Extract,
    Parse,
    Backup,
    Commit,
    Delete,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Scan => "scan",
            Self::Extract => "extract",
            Self::Parse => "parse",
            Self::Backup => "backup",
            Self::Commit => "commit",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("token lookup collision")]
    TokenLookupCollision,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("invalid token format")]
    InvalidTokenFormat,

    #[error("token expired")]
    TokenExpired,

    #[error("conflict: {0}")]
    Conflict(String),

    /// Bad input shape, rejected before any filesystem work.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The scanner or extractor found a hard violation.
    #[error("archive rejected: {}", first_violation(.violations))]
    Security {
        phase: Phase,
        violations: Vec<Violation>,
    },

    #[error("filesystem error during {phase}: {source}")]
    Filesystem {
        phase: Phase,
        #[source]
        source: std::io::Error,
    },

    /// The extracted archive has no recognizable entry point.
    #[error("invalid build structure: {0}")]
    Structure(String),

    #[error("failed to persist project: {0}")]
    Persistence(String),
}

fn first_violation(violations: &[Violation]) -> String {
    violations
        .first()
        .map(|v| v.message.clone())
        .unwrap_or_else(|| "security check failed".to_string())
}

impl Error {
    pub fn fs(phase: Phase, source: std::io::Error) -> Self {
        Self::Filesystem { phase, source }
    }

    /// Message safe to show to callers without elevated privileges.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Security { .. } => "Upload rejected by security checks".to_string(),
            Self::Database(_) | Self::Io(_) | Self::Filesystem { .. } | Self::Persistence(_) => {
                "Internal error while processing the project".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Error taxonomy shared by catalog loading, index builds, and cache persistence.

/// Fieldless discriminant of [`ArtError`], stable enough to branch on in callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SourceUnavailable,
    SourceBusy,
    Network,
    MalformedPayload,
    EmptyPayload,
    CapabilityDisabled,
    StorageCapacityExceeded,
    InvalidInput,
    Storage,
    Cancelled,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ArtError {
    #[error("Catalog source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Catalog source is still generating its catalog: {0}")]
    SourceBusy(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed catalog payload: {0}")]
    MalformedPayload(String),

    #[error("Catalog payload is empty: {0}")]
    EmptyPayload(String),

    #[error("Catalog feature disabled upstream: {0}")]
    CapabilityDisabled(String),

    #[error("Storage capacity exceeded: {size} bytes > {limit} bytes")]
    StorageCapacityExceeded { size: usize, limit: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ArtError>;

impl ArtError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            Self::SourceBusy(_) => ErrorKind::SourceBusy,
            Self::Network(_) => ErrorKind::Network,
            Self::MalformedPayload(_) => ErrorKind::MalformedPayload,
            Self::EmptyPayload(_) => ErrorKind::EmptyPayload,
            Self::CapabilityDisabled(_) => ErrorKind::CapabilityDisabled,
            Self::StorageCapacityExceeded { .. } => ErrorKind::StorageCapacityExceeded,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// User-facing hint describing what can be done about the failure.
    pub fn remediation(&self) -> &'static str {
        match self.kind() {
            ErrorKind::SourceUnavailable => {
                "Check the catalog URL in config.toml and that the source is reachable."
            }
            ErrorKind::SourceBusy => {
                "The catalog is still being generated upstream. Try again in a few minutes."
            }
            ErrorKind::Network => "Check your internet connection and retry.",
            ErrorKind::MalformedPayload => {
                "The catalog file could not be parsed. Clear the cache and rebuild."
            }
            ErrorKind::EmptyPayload => {
                "The catalog contained no usable images. Verify the source has content."
            }
            ErrorKind::CapabilityDisabled => {
                "Bulk catalog access is disabled for this account or source. Use per-term search instead."
            }
            ErrorKind::StorageCapacityExceeded => {
                "The index is too large for the fallback cache. It will be rebuilt next session."
            }
            ErrorKind::InvalidInput => "Check the request parameters.",
            ErrorKind::Storage => "Local cache storage failed. Clear the cache directory and retry.",
            ErrorKind::Cancelled => "The operation was cancelled.",
        }
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SourceBusy | ErrorKind::Network | ErrorKind::SourceUnavailable
        )
    }
}

impl From<rusqlite::Error> for ArtError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<std::io::Error> for ArtError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ArtError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedPayload(err.to_string())
    }
}

/// Maps a `ureq` failure onto the taxonomy. Statuses carry the most specific signal.
pub fn classify_ureq_failure(error: &ureq::Error, context: &str) -> ArtError {
    match error {
        ureq::Error::Status(code, _) => match code {
            202 | 409 | 425 => ArtError::SourceBusy(format!("{context}: HTTP {code}")),
            401 | 403 => ArtError::CapabilityDisabled(format!("{context}: HTTP {code}")),
            404 | 410 => ArtError::SourceUnavailable(format!("{context}: HTTP {code}")),
            408 | 429 | 500 | 502 | 503 | 504 => {
                ArtError::Network(format!("{context}: HTTP {code}"))
            }
            _ => ArtError::SourceUnavailable(format!("{context}: HTTP {code}")),
        },
        ureq::Error::Transport(transport) => {
            ArtError::Network(format!("{context}: {transport}"))
        }
    }
}

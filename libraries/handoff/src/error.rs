/// Failure of the on-device key-value storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on key `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not encode `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// An error reported by the remote service or the transport in front of it.
///
/// Kept as plain data so callers (and the retry classifier) can inspect the
/// message and code without knowing which backend produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
    pub code: Option<String>,
    pub status: Option<u16>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Expired or rejected credentials.
    pub fn is_auth(&self) -> bool {
        self.status == Some(401)
            || self.code.as_deref() == Some("PGRST301")
            || self.message.contains("JWT")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("not signed in to an account")]
    Auth,
    #[error("{0}")]
    Permission(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl Error {
    pub fn set_not_found(id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "word set",
            id: id.into(),
        }
    }

    pub fn guest_not_found() -> Self {
        Error::NotFound {
            kind: "guest user",
            id: "local".to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

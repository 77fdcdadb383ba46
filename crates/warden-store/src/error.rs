//! Error types for the store layer.

/// Errors that can occur while talking to the session store.
///
/// A missing key is never an error here; lookups return `Option`. These
/// variants cover the store being unreachable or returning data we cannot
/// use, and the session layer treats all of them as "fail closed".
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (refused, dropped, timed out).
    #[error("store connection failed: {0}")]
    Connection(String),

    /// The store answered with an error for a command or script.
    #[error("store command failed: {0}")]
    Command(String),

    /// A record could not be encoded before writing.
    #[error("failed to encode session record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be decoded.
    #[error("corrupt value under {key}: {message}")]
    Corrupt {
        /// The key holding the bad value.
        key: String,
        /// What went wrong while decoding it.
        message: String,
    },
}

impl StoreError {
    /// Returns `true` if retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

#[cfg(feature = "redis")]
impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            Self::Connection(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}

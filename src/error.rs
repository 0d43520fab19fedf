use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("I/O failure: {context}")]
    Io {
        context: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported in this mode: {0}")]
    Unsupported(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("The database has encountered a critical error, and needs to be restarted")]
    Panicked {
        #[source]
        cause: Arc<Error>,
    },

    #[error("Failed to append transaction to the log")]
    Append {
        #[source]
        cause: Arc<Error>,
    },

    #[error("Failed to apply transaction {tx_id}")]
    Apply {
        tx_id: u64,
        #[source]
        cause: Arc<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source: Arc::new(source),
        }
    }

    /// Follows the wrapper variants down to the fault that started the chain.
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        loop {
            match current {
                Error::Panicked { cause } | Error::Append { cause } | Error::Apply { cause, .. } => {
                    current = cause.as_ref();
                }
                other => return other,
            }
        }
    }

    /// True if this error, or any wrapper in its chain, is an "already panicked" rejection.
    pub fn is_panic(&self) -> bool {
        let mut current = self;
        loop {
            match current {
                Error::Panicked { .. } => return true,
                Error::Append { cause } | Error::Apply { cause, .. } => current = cause.as_ref(),
                _ => return false,
            }
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(self.root_cause(), Error::Io { .. })
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self.root_cause(), Error::OutOfMemory(_))
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(err: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

use std::error::Error;
use std::fmt;
use std::io;

/// Boxed error type for failures originating in user handlers.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Errors produced while driving the event cycle.
///
/// `Select` covers multiplexer-level failures (the wait call itself, or a
/// register/modify/unregister while reconciling). `ReadHandler` and
/// `WriteHandler` wrap errors returned by user callbacks. The distinction
/// matters for error handlers deciding whether a failure is scoped to one
/// resource or to the loop as a whole.
#[derive(Debug)]
pub enum CycleError {
    Select { message: String, cause: io::Error },
    ReadHandler(BoxError),
    WriteHandler(BoxError),
}

impl CycleError {
    pub(crate) fn select(message: &str, cause: io::Error) -> Self {
        CycleError::Select {
            message: message.to_string(),
            cause,
        }
    }

    /// True for multiplexer-level failures.
    pub fn is_internal(&self) -> bool {
        matches!(self, CycleError::Select { .. })
    }

    /// True for failures raised by a user read or write handler.
    pub fn is_handler(&self) -> bool {
        matches!(self, CycleError::ReadHandler(_) | CycleError::WriteHandler(_))
    }

    /// The wrapped original cause.
    pub fn cause(&self) -> &(dyn Error + 'static) {
        match self {
            CycleError::Select { cause, .. } => cause,
            CycleError::ReadHandler(cause) | CycleError::WriteHandler(cause) => cause.as_ref(),
        }
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::Select { message, cause } => write!(f, "{}: {}", message, cause),
            CycleError::ReadHandler(cause) => write!(f, "read handler failed: {}", cause),
            CycleError::WriteHandler(cause) => write!(f, "write handler failed: {}", cause),
        }
    }
}

impl Error for CycleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.cause())
    }
}

pub type Result<T> = std::result::Result<T, CycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let internal = CycleError::select("wait failed", io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(internal.is_internal());
        assert!(!internal.is_handler());

        let handler = CycleError::ReadHandler("bad read".into());
        assert!(handler.is_handler());
        assert!(!handler.is_internal());
    }

    #[test]
    fn test_display_and_source() {
        let err = CycleError::select("wait failed", io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(err.to_string().contains("wait failed"));
        assert!(err.source().is_some());

        let err = CycleError::WriteHandler("bad write".into());
        assert!(err.to_string().contains("write handler"));
        assert_eq!(err.cause().to_string(), "bad write");
    }
}

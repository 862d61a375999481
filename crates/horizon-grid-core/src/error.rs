//! Error types for the core crate.

use thiserror::Error;

/// Any error raised by the core systems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("signal error: {0}")]
    Signal(#[from] SignalError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// The id was never issued by this signal or is already disconnected.
    #[error("no listener is connected under this id")]
    InvalidConnection,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no subscription is registered under this id")]
    UnknownSubscription,
    /// Listeners kept writing state from inside their notifications.
    #[error("state did not settle after {rounds} notification rounds")]
    NotificationLoop { rounds: usize },
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_convert_into_core_error() {
        let err: CoreError = StoreError::NotificationLoop { rounds: 8 }.into();
        assert_eq!(
            err.to_string(),
            "store error: state did not settle after 8 notification rounds"
        );
        assert!(matches!(
            CoreError::from(SignalError::InvalidConnection),
            CoreError::Signal(_)
        ));
    }
}

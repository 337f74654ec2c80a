//! Error taxonomy surfaced by the coordination service.

/// Result type for coordination service operations
pub type CoordResult<T> = Result<T, CoordError>;

/// Failures surfaced by a coordination service.
///
/// The taxonomy splits three ways: transient faults worth retrying
/// (`ConnectionLoss`, `OperationTimeout`), session-fatal faults that must
/// never be retried (`SessionExpired`, `NoAuth`), and protocol answers
/// (`NoNode`, `NodeExists`, `BadVersion`) that callers handle at the call
/// site, often as benign races.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordError {
    /// No node exists at the path
    #[error("no node at {path}")]
    NoNode {
        /// Path that was addressed
        path: String,
    },

    /// A node already exists at the path
    #[error("node already exists at {path}")]
    NodeExists {
        /// Path that was addressed
        path: String,
    },

    /// Conditional delete failed the version check
    #[error("version mismatch at {path}: expected {expected}, actual {actual}")]
    BadVersion {
        /// Path that was addressed
        path: String,
        /// Version the caller required
        expected: i32,
        /// Version the node actually carries
        actual: i32,
    },

    /// Malformed path
    #[error("bad path {path:?}: {reason}")]
    BadPath {
        /// Offending path
        path: String,
        /// What is wrong with it
        reason: String,
    },

    /// Connection to the service was lost mid-operation
    #[error("connection to the coordination service was lost")]
    ConnectionLoss,

    /// The operation timed out
    #[error("operation against the coordination service timed out")]
    OperationTimeout,

    /// The session expired; all of its ephemeral state is gone
    #[error("coordination session expired")]
    SessionExpired,

    /// The session is not authorized for the operation
    #[error("not authorized")]
    NoAuth,
}

impl CoordError {
    /// True for faults a caller may retry after a backoff delay.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionLoss | Self::OperationTimeout)
    }

    /// True for faults that invalidate the whole session. Retrying cannot
    /// be correct: every ephemeral node the session owned is already gone.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::NoAuth)
    }

    /// True when the failure is "the node is not there".
    #[must_use]
    pub fn is_no_node(&self) -> bool {
        matches!(self, Self::NoNode { .. })
    }

    /// True when the failure is "the node is already there".
    #[must_use]
    pub fn is_node_exists(&self) -> bool {
        matches!(self, Self::NodeExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CoordError::ConnectionLoss.is_transient());
        assert!(CoordError::OperationTimeout.is_transient());
        assert!(!CoordError::SessionExpired.is_transient());
        assert!(
            !CoordError::NoNode {
                path: "/a".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_session_fatal_classification() {
        assert!(CoordError::SessionExpired.is_session_fatal());
        assert!(CoordError::NoAuth.is_session_fatal());
        assert!(!CoordError::ConnectionLoss.is_session_fatal());
        assert!(
            !CoordError::NodeExists {
                path: "/a".to_string()
            }
            .is_session_fatal()
        );
    }

    #[test]
    fn test_error_display() {
        let err = CoordError::NoNode {
            path: "/queue/qn-0000000003".to_string(),
        };
        assert_eq!(format!("{}", err), "no node at /queue/qn-0000000003");

        let err = CoordError::BadVersion {
            path: "/a".to_string(),
            expected: 2,
            actual: 5,
        };
        let s = format!("{}", err);
        assert!(s.contains("expected 2"));
        assert!(s.contains("actual 5"));
    }
}

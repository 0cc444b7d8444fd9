//! Error types for the synced gateway.
//!
//! Errors come in two classes. *Silent* errors (denied control, dead or
//! unknown references, insufficient resources) are expected outcomes that a
//! script observes as `nil`/`false`. *Fatal* errors (malformed arguments,
//! recursion overflow) abort the current script call with a message.

use thiserror::Error;

/// Result type alias using [`GatewayError`].
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Closed set of failures a gateway verb can produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Caller context may not act on the target.
    #[error("[{verb}] not a controllable target")]
    Unauthorized {
        /// Verb that was called.
        verb: &'static str,
    },

    /// Referenced entity, team or player does not exist or is dead.
    #[error("[{verb}] invalid {kind} reference {id}")]
    InvalidReference {
        /// Verb that was called.
        verb: &'static str,
        /// Kind of reference ("unit", "team", ...).
        kind: &'static str,
        /// The offending id.
        id: i64,
    },

    /// A resource check-then-use failed.
    #[error("[{verb}] insufficient resources")]
    InsufficientResource {
        /// Verb that was called.
        verb: &'static str,
    },

    /// Argument arity, type or structure was wrong.
    #[error("[{verb}] {message}")]
    MalformedArgument {
        /// Verb that was called.
        verb: &'static str,
        /// Human readable description.
        message: String,
    },

    /// A guarded category was re-entered past the maximum depth.
    #[error("[{verb}] recursion is not permitted, max depth: {max_depth}")]
    RecursionLimitExceeded {
        /// Verb that was called.
        verb: &'static str,
        /// Configured maximum depth.
        max_depth: u32,
    },
}

impl GatewayError {
    /// Shorthand for a [`GatewayError::MalformedArgument`].
    pub fn malformed(verb: &'static str, message: impl Into<String>) -> Self {
        Self::MalformedArgument {
            verb,
            message: message.into(),
        }
    }

    /// Whether this error aborts the script call.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedArgument { .. } | Self::RecursionLimitExceeded { .. }
        )
    }

    /// Verb the error was raised for.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Unauthorized { verb }
            | Self::InvalidReference { verb, .. }
            | Self::InsufficientResource { verb }
            | Self::MalformedArgument { verb, .. }
            | Self::RecursionLimitExceeded { verb, .. } => verb,
        }
    }
}

/// Converts silent failures into `None` while propagating fatal ones.
pub trait ScriptOutcome<T> {
    /// `Ok(v)` becomes `Ok(Some(v))`, silent errors become `Ok(None)`.
    fn silent(self) -> Result<Option<T>>;
}

impl<T> ScriptOutcome<T> for Result<T> {
    fn silent(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                tracing::debug!(error = %err, "silent rejection");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(GatewayError::malformed("SetUnitHealth", "bad").is_fatal());
        assert!(GatewayError::RecursionLimitExceeded {
            verb: "CreateUnit",
            max_depth: 16
        }
        .is_fatal());
        assert!(!GatewayError::Unauthorized { verb: "DestroyUnit" }.is_fatal());
        assert!(!GatewayError::InsufficientResource { verb: "UseTeamResource" }.is_fatal());
    }

    #[test]
    fn test_silent_swallows_expected_failures() {
        let denied: Result<u32> = Err(GatewayError::Unauthorized { verb: "X" });
        assert_eq!(denied.silent(), Ok(None));

        let fatal: Result<u32> = Err(GatewayError::malformed("X", "bad"));
        assert!(fatal.silent().is_err());

        let ok: Result<u32> = Ok(3);
        assert_eq!(ok.silent(), Ok(Some(3)));
    }

    #[test]
    fn test_message_names_verb() {
        let err = GatewayError::RecursionLimitExceeded {
            verb: "GiveOrderToUnit",
            max_depth: 16,
        };
        assert_eq!(
            err.to_string(),
            "[GiveOrderToUnit] recursion is not permitted, max depth: 16"
        );
    }
}

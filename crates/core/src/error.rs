//! Error taxonomy for context propagation.

/// Errors surfaced by the propagation machinery.
///
/// Configuration errors indicate mis-wiring and are never swallowed.
/// Activation errors come from a single manager rejecting a value;
/// reactivation errors wrap them when a snapshot fails to re-establish
/// partway through (after rolling back the scopes that were already
/// activated).
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The propagation machinery was wired up incorrectly.
    #[error("invalid propagation configuration: {reason}")]
    Configuration {
        /// What was mis-wired.
        reason: String,
    },

    /// A manager rejected the value it was asked to activate.
    #[error("context manager '{manager}' failed to activate a value: {reason}")]
    Activation {
        /// Type name of the rejecting manager.
        manager: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Re-establishing a snapshot failed partway through. Scopes that were
    /// already activated have been closed again in reverse order.
    #[error("failed to reactivate context snapshot at manager '{manager}'")]
    Reactivation {
        /// Type name of the manager that failed.
        manager: &'static str,
        /// The underlying activation failure.
        #[source]
        source: Box<ContextError>,
    },
}

impl ContextError {
    /// Shorthand for [`ContextError::Configuration`].
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ContextError::Activation`].
    pub fn activation(manager: &'static str, reason: impl Into<String>) -> Self {
        Self::Activation {
            manager,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_display() {
        let err = ContextError::configuration("manager registered twice");
        assert_eq!(
            err.to_string(),
            "invalid propagation configuration: manager registered twice"
        );
    }

    #[test]
    fn activation_display() {
        let err = ContextError::activation("locale::LocaleManager", "expected a Locale value");
        assert_eq!(
            err.to_string(),
            "context manager 'locale::LocaleManager' failed to activate a value: \
             expected a Locale value"
        );
    }

    #[test]
    fn reactivation_carries_cause() {
        use std::error::Error;

        let cause = ContextError::activation("m", "nope");
        let err = ContextError::Reactivation {
            manager: "m",
            source: Box::new(cause),
        };
        assert_eq!(
            err.to_string(),
            "failed to reactivate context snapshot at manager 'm'"
        );
        assert!(err.source().is_some());
    }
}

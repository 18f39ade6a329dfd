//! Constructor methods and convenience functions for HiveError

use super::types::HiveError;

impl HiveError {
    /// Create a configuration error with component and message
    ///
    /// # Examples
    /// ```rust
    /// use vmhive_core::error::HiveError;
    ///
    /// let err = HiveError::configuration("cluster.max_voters", "must be odd");
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        HiveError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a Storage error with a boxed source
    pub fn storage<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        HiveError::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a Serialization error with a boxed source
    pub fn serialization<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        HiveError::Serialization {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a DatabaseError with a boxed source
    pub fn database<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        HiveError::DatabaseError {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn security(message: impl Into<String>) -> Self {
        HiveError::Security {
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        HiveError::Authentication {
            message: message.into(),
        }
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        HiveError::AuthorizationError {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        HiveError::Internal {
            message: message.into(),
        }
    }

    pub fn not_leader(operation: impl Into<String>) -> Self {
        HiveError::NotLeader {
            operation: operation.into(),
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        HiveError::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn not_initialized(component: impl Into<String>) -> Self {
        HiveError::NotInitialized {
            component: component.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        HiveError::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Collapse a list of step failures into one error, or `Ok` when empty
    pub fn from_many(context: impl Into<String>, mut errors: Vec<HiveError>) -> Result<(), Self> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(HiveError::Multiple {
                context: context.into(),
                errors,
            }),
        }
    }

    pub fn is_not_leader(&self) -> bool {
        matches!(self, HiveError::NotLeader { .. })
    }

    pub fn is_discharge_required(&self) -> bool {
        matches!(self, HiveError::DischargeRequired { .. })
    }

    pub fn is_some_nodes_behind(&self) -> bool {
        matches!(self, HiveError::SomeNodesBehind { .. })
    }
}

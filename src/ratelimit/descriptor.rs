//! Rate limit key handling.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{LimiterError, Result};

/// A key that identifies one logical rate limit bucket family.
///
/// Identifier, resource and operation are required; metadata is copied onto
/// newly created counters and otherwise ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitKey {
    /// Who is making the request (user, API key, client address)
    pub identifier: String,
    /// What is being accessed
    pub resource: String,
    /// How it is being accessed
    pub operation: String,
    /// Free-form attributes carried onto persisted entries
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RateLimitKey {
    /// Create a new key without metadata.
    pub fn new(
        identifier: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            resource: resource.into(),
            operation: operation.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata attribute.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Reject keys with a blank identifier, resource or operation.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("identifier", &self.identifier),
            ("resource", &self.resource),
            ("operation", &self.operation),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(LimiterError::InvalidInput(format!("{} is required", name)));
            }
        }
        Ok(())
    }

    /// The `resource#operation` component of the persisted sort key.
    pub fn scope(&self) -> String {
        format!("{}#{}", self.resource, self.operation)
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}#{}", self.identifier, self.resource, self.operation)
    }
}

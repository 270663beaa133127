use std::{borrow::Borrow, fmt, sync::Arc};

/// Identifies a deployment.
///
/// The identifier is opaque to the sensor: it is never validated against
/// cluster state. It is reference-counted because the same ID is held in many
/// forward-index sets at once.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeploymentId(Arc<str>);

/// Identifies a container as reported by the container runtime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(Arc<str>);

// === impl DeploymentId ===

impl DeploymentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeploymentId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for DeploymentId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

// `Hash` for `Arc<str>` hashes the underlying string, so borrowed lookups
// by `&str` hit the same buckets.
impl Borrow<str> for DeploymentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// === impl ContainerId ===

impl ContainerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContainerId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for ContainerId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

impl Borrow<str> for ContainerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

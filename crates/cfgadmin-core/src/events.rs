//! Configuration change events delivered to listeners

use std::fmt;

/// What happened to a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Properties were updated
    Updated,
    /// The configuration was deleted
    Deleted,
    /// The owner location changed
    LocationChanged,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::LocationChanged => "location-changed",
        })
    }
}

/// Event describing a configuration change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationEvent {
    /// Kind of change
    pub kind: EventKind,
    /// Affected configuration
    pub pid: String,
    /// Factory pid of a factory member
    pub factory_pid: Option<String>,
}

impl ConfigurationEvent {
    /// Create an event
    #[inline]
    #[must_use]
    pub fn new(kind: EventKind, pid: impl Into<String>, factory_pid: Option<String>) -> Self {
        Self {
            kind,
            pid: pid.into(),
            factory_pid,
        }
    }
}

impl fmt::Display for ConfigurationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.factory_pid {
            Some(factory_pid) => write!(f, "{} {} (factory {factory_pid})", self.kind, self.pid),
            None => write!(f, "{} {}", self.kind, self.pid),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states for a managed infrastructure resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Record exists but the resource has never been started
    Created,
    /// Resource is coming up
    Starting,
    /// Resource is up and serving
    Running,
    /// Resource is shutting down
    Stopping,
    /// Resource is down but intact
    Stopped,
    /// Resource is restarting
    Rebooting,
    /// Resource is being moved to another host
    Migrating,
    /// Connectivity to the resource has been lost
    Unknown,
    /// Resource has been logically deleted
    Destroyed,
    /// Destroyed resource is being garbage-collected
    Expunging,
}

impl ResourceState {
    /// Check if this is a terminal state (no further lifecycle operations)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed | Self::Expunging)
    }

    /// Check if the resource is in a transient state another operation is
    /// currently driving
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Stopping | Self::Rebooting | Self::Migrating
        )
    }

    /// Check if the resource is up and able to serve requests
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Rebooting => write!(f, "rebooting"),
            Self::Migrating => write!(f, "migrating"),
            Self::Unknown => write!(f, "unknown"),
            Self::Destroyed => write!(f, "destroyed"),
            Self::Expunging => write!(f, "expunging"),
        }
    }
}

impl std::str::FromStr for ResourceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "rebooting" => Ok(Self::Rebooting),
            "migrating" => Ok(Self::Migrating),
            "unknown" => Ok(Self::Unknown),
            "destroyed" => Ok(Self::Destroyed),
            "expunging" => Ok(Self::Expunging),
            _ => Err(format!("Invalid resource state: {s}")),
        }
    }
}

/// Connectivity status toward the resource's backend, tracked separately
/// from the lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

use super::states::ResourceState;

/// Lifecycle events reported about a resource from outside the command path
/// (monitoring, garbage collection, administrative action).
///
/// Whether an event actually moves the resource is decided by the
/// transition table; most states ignore a low-signal event like
/// [`StateEvent::ConnectivityUnknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateEvent {
    /// Connectivity to the resource has been lost
    ConnectivityUnknown,
    /// Connectivity has been re-established after loss
    Recovered,
    /// The resource has been logically deleted
    Destroyed,
    /// A destroyed resource is being garbage-collected
    Expunging,
}

impl StateEvent {
    /// The state this event drives the resource into, when the transition
    /// table says a transition is required
    pub fn target_state(&self) -> ResourceState {
        match self {
            Self::ConnectivityUnknown => ResourceState::Unknown,
            Self::Recovered => ResourceState::Running,
            Self::Destroyed => ResourceState::Destroyed,
            Self::Expunging => ResourceState::Expunging,
        }
    }
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectivityUnknown => write!(f, "connectivity_unknown"),
            Self::Recovered => write!(f, "recovered"),
            Self::Destroyed => write!(f, "destroyed"),
            Self::Expunging => write!(f, "expunging"),
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::states::{ConnectionStatus, ResourceState};

/// The persisted record for a managed resource.
///
/// Mutated only under the resource's serialization slot; after any mutation
/// the owning handler persists it and works with the refreshed copy so
/// extension hooks observe the post-commit value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: Uuid,
    pub name: String,
    /// Resource kind, doubling as the issuer tag for dependency lookups
    pub kind: String,
    pub state: ResourceState,
    pub status: ConnectionStatus,
    /// Peers (clusters, hosts) this resource is currently attached to
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: kind.into(),
            state: ResourceState::default(),
            status: ConnectionStatus::default(),
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Lightweight reference used on cascade and dependency-graph paths
    pub fn as_ref(&self) -> ResourceRef {
        ResourceRef {
            id: self.id,
            kind: self.kind.clone(),
            name: self.name.clone(),
        }
    }

    pub fn is_attached_to(&self, peer: &str) -> bool {
        self.attachments.iter().any(|p| p == peer)
    }
}

/// Identity of a resource as seen by collaborators that do not hold its
/// full record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: Uuid,
    pub kind: String,
    pub name: String,
}

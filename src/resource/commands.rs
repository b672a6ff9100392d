use serde::{Deserialize, Serialize};
use std::fmt;

use super::events::StateEvent;

/// Deletion modes for destructive commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionMode {
    /// Check dependents first and abort if any vetoes
    Permissive,
    /// Skip the check phase and tolerate dependent failures
    Force,
}

/// Inbound commands directed at a resource, with their payloads.
///
/// Dispatch is keyed by [`CommandKind`], resolved once at admission time;
/// handlers never re-inspect the payload to figure out what they are
/// handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Command {
    /// First boot of a freshly created resource
    StartNewInstance,
    Start,
    Stop,
    Reboot,
    /// Establish backend connectivity
    Connect,
    /// Attach the resource to a peer (cluster, host, consumer)
    Attach { peer: String },
    /// Detach the resource from a peer
    Detach { peer: String },
    /// Apply an administrative state event
    ChangeState { event: StateEvent },
    /// Delete this resource and cascade to its dependents
    Destroy { mode: DeletionMode },
    Migrate { target_host: String },
    GetMigrationTarget,
}

impl Command {
    /// The admission-control key for this command
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::StartNewInstance => CommandKind::StartNewInstance,
            Self::Start => CommandKind::Start,
            Self::Stop => CommandKind::Stop,
            Self::Reboot => CommandKind::Reboot,
            Self::Connect => CommandKind::Connect,
            Self::Attach { .. } => CommandKind::Attach,
            Self::Detach { .. } => CommandKind::Detach,
            Self::ChangeState { .. } => CommandKind::ChangeState,
            Self::Destroy { .. } => CommandKind::Destroy,
            Self::Migrate { .. } => CommandKind::Migrate,
            Self::GetMigrationTarget => CommandKind::GetMigrationTarget,
        }
    }
}

/// Command kinds used by the operation gate's admission table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    StartNewInstance,
    Start,
    Stop,
    Reboot,
    Connect,
    Attach,
    Detach,
    ChangeState,
    Destroy,
    Migrate,
    GetMigrationTarget,
}

impl CommandKind {
    /// Whether this command mutates the resource and must therefore hold the
    /// resource's serialization slot
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::GetMigrationTarget)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartNewInstance => write!(f, "start_new_instance"),
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Reboot => write!(f, "reboot"),
            Self::Connect => write!(f, "connect"),
            Self::Attach => write!(f, "attach"),
            Self::Detach => write!(f, "detach"),
            Self::ChangeState => write!(f, "change_state"),
            Self::Destroy => write!(f, "destroy"),
            Self::Migrate => write!(f, "migrate"),
            Self::GetMigrationTarget => write!(f, "get_migration_target"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_kind_resolution() {
        assert_eq!(
            Command::Attach {
                peer: "cluster-1".into()
            }
            .kind(),
            CommandKind::Attach
        );
        assert_eq!(
            Command::Destroy {
                mode: DeletionMode::Force
            }
            .kind(),
            CommandKind::Destroy
        );
    }

    #[test]
    fn test_read_only_commands_skip_serialization() {
        assert!(!CommandKind::GetMigrationTarget.is_mutating());
        assert!(CommandKind::Destroy.is_mutating());
        assert!(CommandKind::Attach.is_mutating());
    }

    #[test]
    fn test_command_serde_tagging() {
        let json = serde_json::to_string(&Command::Detach {
            peer: "cluster-2".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"detach\""));
        let parsed: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), CommandKind::Detach);
    }
}

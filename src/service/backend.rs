use crate::completion::Completion;
use crate::resource::ResourceRecord;

/// Resource-type-specific backend operations.
///
/// Every method receives a [`Completion`] and may return before the work is
/// done; the kernel awaits the completion, never the method itself. Defaults
/// succeed immediately, so a backend implements only the operations its
/// resource type actually performs.
#[allow(unused_variables)]
pub trait ResourceBackend: Send + Sync {
    /// Establish connectivity to the backing system
    fn connect(&self, resource: &ResourceRecord, completion: Completion);

    fn start(&self, resource: &ResourceRecord, completion: Completion) {
        completion.success();
    }

    fn stop(&self, resource: &ResourceRecord, completion: Completion) {
        completion.success();
    }

    fn reboot(&self, resource: &ResourceRecord, completion: Completion) {
        completion.success();
    }

    fn attach(&self, resource: &ResourceRecord, peer: &str, completion: Completion) {
        completion.success();
    }

    fn detach(&self, resource: &ResourceRecord, peer: &str, completion: Completion) {
        completion.success();
    }

    fn migrate(&self, resource: &ResourceRecord, target_host: &str, completion: Completion) {
        completion.success();
    }

    /// Remove the resource's on-disk footprint during deletion
    fn delete_bits(&self, resource: &ResourceRecord, completion: Completion) {
        completion.success();
    }

    /// Candidate hosts the resource could migrate to
    fn migration_candidates(&self, resource: &ResourceRecord) -> Vec<String> {
        Vec::new()
    }
}

/// Backend that accepts every operation; useful for resource types whose
/// lifecycle is purely logical, and for tests
#[derive(Debug, Default)]
pub struct NullBackend;

impl ResourceBackend for NullBackend {
    fn connect(&self, _resource: &ResourceRecord, completion: Completion) {
        completion.success();
    }
}

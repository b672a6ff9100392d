use crate::error::{OrchestrationError, Result};

/// Runtime configuration for the orchestration kernel
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Signature shared by all inbound API commands before per-resource
    /// serialization kicks in
    pub api_worker_signature: String,
    /// Concurrency level for the shared API admission pool
    pub api_worker_count: usize,
    /// Capacity of the published-event broadcast channel. The service never
    /// builds its own bus; embedders pass this to
    /// [`crate::bus::InMemoryBus::new`] (or their transport's equivalent)
    /// when wiring one up.
    pub event_channel_capacity: usize,
    /// Maximum dependency-graph depth a cascade will traverse before
    /// treating the graph as cyclic; passed to
    /// [`crate::cascade::CascadeEngine::new`] when wiring an engine
    pub cascade_max_depth: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_worker_signature: "api.worker".to_string(),
            api_worker_count: 5,
            event_channel_capacity: 1000,
            cascade_max_depth: 16,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(count) = std::env::var("STRATUS_API_WORKER_COUNT") {
            config.api_worker_count = count.parse().map_err(|e| {
                OrchestrationError::Configuration(format!("Invalid api_worker_count: {e}"))
            })?;
        }

        if let Ok(capacity) = std::env::var("STRATUS_EVENT_CHANNEL_CAPACITY") {
            config.event_channel_capacity = capacity.parse().map_err(|e| {
                OrchestrationError::Configuration(format!("Invalid event_channel_capacity: {e}"))
            })?;
        }

        if let Ok(depth) = std::env::var("STRATUS_CASCADE_MAX_DEPTH") {
            config.cascade_max_depth = depth.parse().map_err(|e| {
                OrchestrationError::Configuration(format!("Invalid cascade_max_depth: {e}"))
            })?;
        }

        Ok(config)
    }
}

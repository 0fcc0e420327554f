//! Collaborator seams for the condition cache.
//!
//! The cache never touches durable storage, topology bookkeeping, or the
//! notification transport directly; it talks to the three traits defined
//! here. Hosting processes supply implementations backed by whatever
//! query layer and messaging they use. Tests supply in-memory fakes.

use crate::types::{
    AgentId, ConditionCategory, ConditionId, ConditionPage, PageControl, ResourceId, ScheduleId,
};

/// Paged query access to the currently-defined alert conditions.
///
/// The cache pages through all candidate composites for one category
/// (and optionally one agent) at partition load time. Implementations
/// report the total row count on every page so the loader knows when to
/// stop.
pub trait ConditionSource: Send + Sync {
    /// Fetch one page of condition composites for the given category.
    ///
    /// `agent_id` is `Some` for agent-scoped categories and `None` for
    /// global ones.
    fn candidate_conditions(
        &self,
        agent_id: Option<AgentId>,
        category: ConditionCategory,
        page: PageControl,
    ) -> Result<ConditionPage, String>;
}

/// Resolution of incoming data to the agent that owns it.
///
/// `None` means the schedule or resource is unknown; the coordinator
/// treats that as "no conditions matched", never as a failure.
pub trait AgentResolver: Send + Sync {
    fn agent_for_schedule(&self, schedule_id: ScheduleId) -> Option<AgentId>;

    fn agent_for_resource(&self, resource_id: ResourceId) -> Option<AgentId>;
}

/// Downstream activate/deactivate notification emission.
///
/// Fire-and-forget from the cache's perspective: a returned error is
/// logged and counted, never retried.
pub trait AlertNotifier: Send + Sync {
    /// Emit an activation for a matched condition, carrying a stringified
    /// form of the matched value plus any category-specific extras (event
    /// detail text, operation status, and the like).
    fn emit_activation(
        &self,
        condition_id: ConditionId,
        timestamp_ms: u64,
        value: &str,
        extra: &[String],
    ) -> Result<(), String>;

    /// Emit a deactivation for a stateful condition that stopped matching.
    fn emit_deactivation(&self, condition_id: ConditionId, timestamp_ms: u64)
        -> Result<(), String>;
}

//! # Alert Condition Cache
//!
//! In-memory, continuously-updated index of active alert-condition
//! definitions, evaluating incoming monitoring data against them in real
//! time without touching durable storage on the hot path.
//!
//! The cache is partitioned: one partition per agent for agent-scoped
//! condition categories (measurement thresholds, baselines, changes,
//! traits, events) and one global partition for the rest (availability,
//! operations, resource configuration). Each partition sits behind its
//! own read/write lock; checks run concurrently under the read lock,
//! reloads rebuild and swap the partition under the write lock.
//!
//! Persistence, agent topology and the notification transport are
//! collaborator traits in [`source`]; the hosting process injects
//! implementations when constructing the [`AlertConditionCache`].

// Core modules
pub mod coordinator;
pub mod element;
pub mod partition;
pub mod source;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use coordinator::AlertConditionCache;
pub use element::{
    AvailabilityElement, ConditionOperator, EventElement, NumericElement, OperationElement,
    ResourceConfigElement, TraitElement,
};
pub use partition::{AgentConditionPartition, GlobalConditionPartition};
pub use source::{AgentResolver, AlertNotifier, ConditionSource};
pub use stats::CacheStats;
pub use types::{
    AgentId, AvailabilityChange, AvailabilityType, CacheName, CacheSizes, ConditionCategory,
    ConditionComposite, ConditionId, ConditionPage, EventRecord, EventSeverity,
    MeasurementReading, OperationDefinitionId, OperationRecord, OperationStatus, PageControl,
    ResourceConfigUpdate, ResourceId, ScheduleId, TraitReading, LOAD_PAGE_SIZE,
};

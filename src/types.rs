//! # Condition Cache Types
//!
//! Core type definitions for the alert condition cache.
//!
//! This module provides:
//! - Identifier aliases shared across the crate
//! - Condition category and comparison enums
//! - Incoming monitoring data records
//! - The condition composite union delivered by the condition source
//! - Paging types for the bulk load protocol

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a persisted alert condition definition.
pub type ConditionId = i32;
/// Identifier of a measurement collection schedule.
pub type ScheduleId = i32;
/// Identifier of a monitored resource.
pub type ResourceId = i32;
/// Identifier of the agent owning a set of resources.
pub type AgentId = i32;
/// Identifier of an operation definition.
pub type OperationDefinitionId = i32;

/// Number of condition composites fetched per page during partition load.
pub const LOAD_PAGE_SIZE: usize = 250;

// ================================================================================================
// CONDITION CATEGORIES
// ================================================================================================

/// The category of an alert condition definition.
///
/// Agent-scoped categories are compiled into per-agent partitions; the
/// remaining categories live in the single global partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionCategory {
    /// Numeric measurement compared against a percentage of its baseline
    Baseline,
    /// Numeric measurement changed from its last known value
    Change,
    /// String trait changed from its last known value
    Trait,
    /// Numeric measurement compared against an absolute threshold
    Threshold,
    /// Event with a matching severity (and optional detail pattern)
    Event,
    /// Availability transition of a resource
    Availability,
    /// Result status of a resource operation
    Operation,
    /// Resource configuration changed
    ResourceConfig,
}

impl ConditionCategory {
    /// All categories compiled into per-agent partitions.
    pub const AGENT_SCOPED: [ConditionCategory; 5] = [
        ConditionCategory::Baseline,
        ConditionCategory::Change,
        ConditionCategory::Trait,
        ConditionCategory::Threshold,
        ConditionCategory::Event,
    ];

    /// All categories compiled into the global partition.
    pub const GLOBAL_SCOPED: [ConditionCategory; 3] = [
        ConditionCategory::Availability,
        ConditionCategory::Operation,
        ConditionCategory::ResourceConfig,
    ];

    /// Whether conditions of this category are routed through a per-agent
    /// partition rather than the global one.
    pub fn is_agent_scoped(&self) -> bool {
        !matches!(
            self,
            ConditionCategory::Availability
                | ConditionCategory::Operation
                | ConditionCategory::ResourceConfig
        )
    }
}

impl fmt::Display for ConditionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConditionCategory::Baseline => "baseline",
            ConditionCategory::Change => "change",
            ConditionCategory::Trait => "trait",
            ConditionCategory::Threshold => "threshold",
            ConditionCategory::Event => "event",
            ConditionCategory::Availability => "availability",
            ConditionCategory::Operation => "operation",
            ConditionCategory::ResourceConfig => "resource_config",
        };
        write!(f, "{}", name)
    }
}

/// Names of the keyed element collections, for size reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheName {
    /// Numeric measurement elements (threshold + baseline + change)
    Measurement,
    /// Trait elements
    MeasurementTrait,
    /// Event elements
    Event,
    /// Availability elements
    Availability,
    /// Operation elements
    Operation,
    /// Resource configuration elements
    ResourceConfig,
}

impl CacheName {
    /// All collection names, in reporting order.
    pub const ALL: [CacheName; 6] = [
        CacheName::Measurement,
        CacheName::MeasurementTrait,
        CacheName::Event,
        CacheName::Availability,
        CacheName::Operation,
        CacheName::ResourceConfig,
    ];
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheName::Measurement => "measurement",
            CacheName::MeasurementTrait => "measurement_trait",
            CacheName::Event => "event",
            CacheName::Availability => "availability",
            CacheName::Operation => "operation",
            CacheName::ResourceConfig => "resource_config",
        };
        write!(f, "{}", name)
    }
}

// ================================================================================================
// ENUMERATED COMPARISON VALUES
// ================================================================================================

/// Severity attached to an incoming event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl FromStr for EventSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "FATAL" => Ok(Self::Fatal),
            _ => Err(format!("unknown event severity: {}", s)),
        }
    }
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        };
        write!(f, "{}", name)
    }
}

/// Availability of a resource as reported by its agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvailabilityType {
    Up,
    Down,
}

impl FromStr for AvailabilityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UP" => Ok(Self::Up),
            "DOWN" => Ok(Self::Down),
            _ => Err(format!("unknown availability type: {}", s)),
        }
    }
}

impl fmt::Display for AvailabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Up => "UP",
                Self::Down => "DOWN",
            }
        )
    }
}

/// Terminal (or in-flight) status of a resource operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    InProgress,
    Success,
    Failure,
    Canceled,
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INPROGRESS" | "IN_PROGRESS" => Ok(Self::InProgress),
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "CANCELED" | "CANCELLED" => Ok(Self::Canceled),
            _ => Err(format!("unknown operation status: {}", s)),
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InProgress => "INPROGRESS",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Canceled => "CANCELED",
        };
        write!(f, "{}", name)
    }
}

// ================================================================================================
// INCOMING MONITORING DATA
// ================================================================================================

/// One collected numeric measurement value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementReading {
    pub schedule_id: ScheduleId,
    pub value: f64,
    pub timestamp_ms: u64,
}

/// One collected string trait value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitReading {
    pub schedule_id: ScheduleId,
    pub value: String,
    pub timestamp_ms: u64,
}

/// One event observed on a resource. The owning resource id travels with
/// the batch, not the record, since a batch always comes from one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub severity: EventSeverity,
    pub detail: String,
    pub timestamp_ms: u64,
}

/// A newly reported availability state for a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityChange {
    pub resource_id: ResourceId,
    pub current: AvailabilityType,
    pub timestamp_ms: u64,
}

/// A completed (or progressing) entry from the operation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub resource_id: ResourceId,
    pub operation_definition_id: OperationDefinitionId,
    pub status: OperationStatus,
    pub timestamp_ms: u64,
}

/// A freshly persisted resource configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfigUpdate {
    pub resource_id: ResourceId,
    pub configuration: Value,
    pub timestamp_ms: u64,
}

// ================================================================================================
// CONDITION COMPOSITES
// ================================================================================================

/// A condition definition joined with the category-specific fields the
/// cache needs to compile it, as delivered by the condition source.
///
/// One variant per category; construction-time validation in the element
/// module replaces any downcasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConditionComposite {
    Threshold {
        condition_id: ConditionId,
        schedule_id: ScheduleId,
        comparator: String,
        threshold: f64,
    },
    Baseline {
        condition_id: ConditionId,
        schedule_id: ScheduleId,
        comparator: String,
        /// Percentage of the baseline statistic, e.g. 50.0 for "50%"
        percentage: f64,
        /// One of the literal statistic names "min", "mean", "max"
        statistic: String,
        baseline_min: Option<f64>,
        baseline_mean: Option<f64>,
        baseline_max: Option<f64>,
    },
    Change {
        condition_id: ConditionId,
        schedule_id: ScheduleId,
        last_value: Option<f64>,
    },
    Trait {
        condition_id: ConditionId,
        schedule_id: ScheduleId,
        current_value: Option<String>,
    },
    Event {
        condition_id: ConditionId,
        resource_id: ResourceId,
        severity: EventSeverity,
        detail_pattern: Option<String>,
    },
    Availability {
        condition_id: ConditionId,
        resource_id: ResourceId,
        /// "UP", "DOWN" or "CHANGES"
        option: String,
        current: Option<AvailabilityType>,
    },
    Operation {
        condition_id: ConditionId,
        resource_id: ResourceId,
        operation_definition_id: OperationDefinitionId,
        /// Status name, e.g. "FAILURE"
        status_option: String,
    },
    ResourceConfig {
        condition_id: ConditionId,
        resource_id: ResourceId,
        current: Option<Value>,
    },
}

impl ConditionComposite {
    /// The persisted condition id behind this composite.
    pub fn condition_id(&self) -> ConditionId {
        match self {
            ConditionComposite::Threshold { condition_id, .. }
            | ConditionComposite::Baseline { condition_id, .. }
            | ConditionComposite::Change { condition_id, .. }
            | ConditionComposite::Trait { condition_id, .. }
            | ConditionComposite::Event { condition_id, .. }
            | ConditionComposite::Availability { condition_id, .. }
            | ConditionComposite::Operation { condition_id, .. }
            | ConditionComposite::ResourceConfig { condition_id, .. } => *condition_id,
        }
    }
}

// ================================================================================================
// PAGING
// ================================================================================================

/// A page request against the condition source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageControl {
    pub page_number: usize,
    pub page_size: usize,
}

impl PageControl {
    pub fn new(page_number: usize, page_size: usize) -> Self {
        Self {
            page_number,
            page_size,
        }
    }
}

/// One page of condition composites, plus the total row count so callers
/// can decide whether more pages remain.
#[derive(Debug, Clone, Default)]
pub struct ConditionPage {
    pub items: Vec<ConditionComposite>,
    pub total: usize,
}

/// Mapping of collection name to element count, for size reporting.
pub type CacheSizes = HashMap<String, usize>;

/// Current Unix timestamp in milliseconds.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_scoping() {
        assert!(ConditionCategory::Threshold.is_agent_scoped());
        assert!(ConditionCategory::Event.is_agent_scoped());
        assert!(!ConditionCategory::Availability.is_agent_scoped());
        assert!(!ConditionCategory::ResourceConfig.is_agent_scoped());
        for c in ConditionCategory::AGENT_SCOPED {
            assert!(c.is_agent_scoped());
        }
        for c in ConditionCategory::GLOBAL_SCOPED {
            assert!(!c.is_agent_scoped());
        }
    }

    #[test]
    fn severity_parsing_round_trip() {
        for s in ["DEBUG", "INFO", "WARN", "ERROR", "FATAL"] {
            let sev: EventSeverity = s.parse().unwrap();
            assert_eq!(sev.to_string(), s);
        }
        assert!("NOTICE".parse::<EventSeverity>().is_err());
    }

    #[test]
    fn operation_status_parsing() {
        assert_eq!(
            "IN_PROGRESS".parse::<OperationStatus>().unwrap(),
            OperationStatus::InProgress
        );
        assert_eq!(
            "failure".parse::<OperationStatus>().unwrap(),
            OperationStatus::Failure
        );
        assert!("DONE".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn composite_condition_id_accessor() {
        let c = ConditionComposite::Threshold {
            condition_id: 17,
            schedule_id: 4,
            comparator: ">".to_string(),
            threshold: 90.0,
        };
        assert_eq!(c.condition_id(), 17);
    }
}

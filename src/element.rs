//! Compiled cache elements.
//!
//! A cache element pairs one condition id with one operator and one
//! comparison value, and knows how to test a freshly observed value.
//! Elements are built once during partition load and discarded wholesale
//! when the partition is replaced; construction failures drop the single
//! element, never the load.
//!
//! The `active` flag is the only post-construction mutation for the
//! comparator operators. CHANGES-family elements additionally track the
//! last value they saw. Both mutate while the holder runs under the
//! partition *read* lock, so they sit behind atomics and mutexes rather
//! than plain fields.

use std::fmt;
use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;

use crate::types::{AvailabilityType, ConditionId, EventSeverity, OperationStatus};

// ================================================================================================
// OPERATORS
// ================================================================================================

/// Comparison semantics bound into a cache element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    LessThan,
    GreaterThan,
    Equals,
    /// Matches when the observed value differs from the last one seen
    Changes,
    /// Matches when the observed value transitions into the comparison value
    ChangesTo,
    /// Matches when the observed value transitions out of the comparison value
    ChangesFrom,
}

impl ConditionOperator {
    /// Whether a positive match implies an "active" state that must later
    /// be cleared with a deactivation. The CHANGES family is stateless and
    /// never deactivates.
    pub fn is_stateful(&self) -> bool {
        !matches!(
            self,
            ConditionOperator::Changes
                | ConditionOperator::ChangesTo
                | ConditionOperator::ChangesFrom
        )
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LessThan => "less_than",
            Self::GreaterThan => "greater_than",
            Self::Equals => "equals",
            Self::Changes => "changes",
            Self::ChangesTo => "changes_to",
            Self::ChangesFrom => "changes_from",
        };
        write!(f, "{}", name)
    }
}

/// Resolve a numeric comparator string into its operator.
fn comparator_operator(comparator: &str) -> Result<ConditionOperator, String> {
    match comparator.trim() {
        "<" => Ok(ConditionOperator::LessThan),
        ">" => Ok(ConditionOperator::GreaterThan),
        "=" | "==" => Ok(ConditionOperator::Equals),
        other => Err(format!("unsupported numeric comparator '{}'", other)),
    }
}

// ================================================================================================
// SHARED ELEMENT STATE
// ================================================================================================

/// Fields every element carries: identity, operator, and the activity flag.
#[derive(Debug)]
pub(crate) struct ElementCore {
    pub condition_id: ConditionId,
    pub operator: ConditionOperator,
    pub active: AtomicBool,
}

impl ElementCore {
    fn new(condition_id: ConditionId, operator: ConditionOperator) -> Self {
        Self {
            condition_id,
            operator,
            active: AtomicBool::new(false),
        }
    }
}

// ================================================================================================
// NUMERIC ELEMENTS (threshold / baseline / change)
// ================================================================================================

/// Element for numeric measurement conditions. Threshold, baseline and
/// change conditions all compile into this type; they differ only in how
/// the comparison value is derived and which operator they carry.
#[derive(Debug)]
pub struct NumericElement {
    pub(crate) core: ElementCore,
    threshold: f64,
    /// Last observed value, tracked only by the `Changes` operator
    last: Mutex<Option<f64>>,
}

impl NumericElement {
    /// Build an element for an absolute-value threshold condition.
    pub fn threshold(
        condition_id: ConditionId,
        comparator: &str,
        threshold: f64,
    ) -> Result<Self, String> {
        if !threshold.is_finite() {
            return Err(format!(
                "condition {}: threshold {} is not a finite number",
                condition_id, threshold
            ));
        }
        let operator = comparator_operator(comparator)?;
        Ok(Self {
            core: ElementCore::new(condition_id, operator),
            threshold,
            last: Mutex::new(None),
        })
    }

    /// Build an element for a percentage-of-baseline condition.
    ///
    /// The statistic name is the inherited contract: exactly "min",
    /// "mean" or "max". The comparison value is resolved at load time to
    /// `percentage / 100 * statistic`.
    #[allow(clippy::too_many_arguments)]
    pub fn baseline(
        condition_id: ConditionId,
        comparator: &str,
        percentage: f64,
        statistic: &str,
        baseline_min: Option<f64>,
        baseline_mean: Option<f64>,
        baseline_max: Option<f64>,
    ) -> Result<Self, String> {
        let stat_value = match statistic {
            "min" => baseline_min,
            "mean" => baseline_mean,
            "max" => baseline_max,
            other => {
                return Err(format!(
                    "condition {}: unrecognized baseline statistic '{}'",
                    condition_id, other
                ));
            }
        };
        let base = stat_value.ok_or_else(|| {
            format!(
                "condition {}: no {} baseline value available",
                condition_id, statistic
            )
        })?;
        let computed = percentage / 100.0 * base;
        if !computed.is_finite() {
            return Err(format!(
                "condition {}: baseline comparison value {} ({}% of {}) is not finite",
                condition_id, computed, percentage, base
            ));
        }
        let operator = comparator_operator(comparator)?;
        Ok(Self {
            core: ElementCore::new(condition_id, operator),
            threshold: computed,
            last: Mutex::new(None),
        })
    }

    /// Build an element for a value-changed condition, seeded with the
    /// last known measurement value. Never fails.
    pub fn change(condition_id: ConditionId, last_value: Option<f64>) -> Self {
        Self {
            core: ElementCore::new(condition_id, ConditionOperator::Changes),
            threshold: f64::NAN,
            last: Mutex::new(last_value),
        }
    }

    /// Test an observed value against this element.
    pub fn matches(&self, value: f64) -> bool {
        match self.core.operator {
            ConditionOperator::LessThan => value < self.threshold,
            ConditionOperator::GreaterThan => value > self.threshold,
            ConditionOperator::Equals => value == self.threshold,
            ConditionOperator::Changes => {
                let mut last = self.last.lock();
                let changed = matches!(*last, Some(previous) if previous != value);
                *last = Some(value);
                changed
            }
            // ChangesTo/ChangesFrom never reach numeric elements
            _ => false,
        }
    }

    pub fn condition_id(&self) -> ConditionId {
        self.core.condition_id
    }

    pub fn operator(&self) -> ConditionOperator {
        self.core.operator
    }

    /// The resolved comparison value (NaN for change elements).
    pub fn comparison_value(&self) -> f64 {
        self.threshold
    }
}

// ================================================================================================
// TRAIT ELEMENTS
// ================================================================================================

/// Element for trait-changed conditions. Always `Changes`; carries the
/// last known trait value and updates it on every check.
#[derive(Debug)]
pub struct TraitElement {
    pub(crate) core: ElementCore,
    last: Mutex<Option<String>>,
}

impl TraitElement {
    pub fn new(condition_id: ConditionId, current_value: Option<String>) -> Self {
        Self {
            core: ElementCore::new(condition_id, ConditionOperator::Changes),
            last: Mutex::new(current_value),
        }
    }

    /// Matches when a previously seen value exists and differs. The newly
    /// observed value is recorded either way, so a first observation
    /// establishes the comparison point without matching.
    pub fn matches(&self, value: &str) -> bool {
        let mut last = self.last.lock();
        let changed = matches!(last.as_deref(), Some(previous) if previous != value);
        if last.as_deref() != Some(value) {
            *last = Some(value.to_string());
        }
        changed
    }

    pub fn condition_id(&self) -> ConditionId {
        self.core.condition_id
    }
}

// ================================================================================================
// EVENT ELEMENTS
// ================================================================================================

/// Element for event conditions: exact severity match plus an optional
/// unanchored pattern over the event detail text.
#[derive(Debug)]
pub struct EventElement {
    pub(crate) core: ElementCore,
    severity: EventSeverity,
    detail_pattern: Option<Regex>,
}

impl EventElement {
    pub fn new(
        condition_id: ConditionId,
        severity: EventSeverity,
        detail_pattern: Option<&str>,
    ) -> Result<Self, String> {
        let detail_pattern = match detail_pattern {
            Some(raw) if !raw.is_empty() => Some(Regex::new(raw).map_err(|e| {
                format!(
                    "condition {}: invalid event detail pattern '{}': {}",
                    condition_id, raw, e
                )
            })?),
            _ => None,
        };
        Ok(Self {
            core: ElementCore::new(condition_id, ConditionOperator::Equals),
            severity,
            detail_pattern,
        })
    }

    pub fn matches(&self, severity: EventSeverity, detail: &str) -> bool {
        if severity != self.severity {
            return false;
        }
        match &self.detail_pattern {
            Some(pattern) => pattern.is_match(detail),
            None => true,
        }
    }

    pub fn condition_id(&self) -> ConditionId {
        self.core.condition_id
    }

    pub fn severity(&self) -> EventSeverity {
        self.severity
    }
}

// ================================================================================================
// AVAILABILITY ELEMENTS
// ================================================================================================

/// Element for availability transition conditions.
///
/// The comparison value is always `Up`; the direction lives in the
/// operator: "goes up" is `ChangesTo`, "goes down" is `ChangesFrom`, and
/// the generic any-transition option is `Changes`. The last reported
/// availability is seeded from the composite and consumed on each check.
#[derive(Debug)]
pub struct AvailabilityElement {
    pub(crate) core: ElementCore,
    last: Mutex<Option<AvailabilityType>>,
}

impl AvailabilityElement {
    pub fn new(
        condition_id: ConditionId,
        option: &str,
        current: Option<AvailabilityType>,
    ) -> Result<Self, String> {
        let operator = match option.to_ascii_uppercase().as_str() {
            "UP" => ConditionOperator::ChangesTo,
            "DOWN" => ConditionOperator::ChangesFrom,
            "CHANGES" => ConditionOperator::Changes,
            other => {
                return Err(format!(
                    "condition {}: unrecognized availability option '{}'",
                    condition_id, other
                ));
            }
        };
        Ok(Self {
            core: ElementCore::new(condition_id, operator),
            last: Mutex::new(current),
        })
    }

    /// Test a newly reported availability, recording it as the new
    /// comparison point. With no previously known state there is no
    /// transition to observe, so nothing matches.
    pub fn matches(&self, current: AvailabilityType) -> bool {
        let mut last = self.last.lock();
        let previous = last.replace(current);
        let Some(previous) = previous else {
            return false;
        };
        match self.core.operator {
            ConditionOperator::ChangesTo => {
                previous != AvailabilityType::Up && current == AvailabilityType::Up
            }
            ConditionOperator::ChangesFrom => {
                previous == AvailabilityType::Up && current != AvailabilityType::Up
            }
            ConditionOperator::Changes => previous != current,
            _ => false,
        }
    }

    pub fn condition_id(&self) -> ConditionId {
        self.core.condition_id
    }

    pub fn operator(&self) -> ConditionOperator {
        self.core.operator
    }
}

// ================================================================================================
// OPERATION ELEMENTS
// ================================================================================================

/// Element for operation-history conditions: exact status equality.
#[derive(Debug)]
pub struct OperationElement {
    pub(crate) core: ElementCore,
    status: OperationStatus,
}

impl OperationElement {
    pub fn new(condition_id: ConditionId, status_option: &str) -> Result<Self, String> {
        let status: OperationStatus = status_option.parse().map_err(|e| {
            format!("condition {}: {}", condition_id, e)
        })?;
        Ok(Self {
            core: ElementCore::new(condition_id, ConditionOperator::Equals),
            status,
        })
    }

    pub fn matches(&self, status: OperationStatus) -> bool {
        status == self.status
    }

    pub fn condition_id(&self) -> ConditionId {
        self.core.condition_id
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }
}

// ================================================================================================
// RESOURCE CONFIGURATION ELEMENTS
// ================================================================================================

/// Element for configuration-changed conditions. Always `Changes`;
/// snapshots are compared by value equality.
#[derive(Debug)]
pub struct ResourceConfigElement {
    pub(crate) core: ElementCore,
    last: Mutex<Option<Value>>,
}

impl ResourceConfigElement {
    pub fn new(condition_id: ConditionId, current: Option<Value>) -> Self {
        Self {
            core: ElementCore::new(condition_id, ConditionOperator::Changes),
            last: Mutex::new(current),
        }
    }

    pub fn matches(&self, configuration: &Value) -> bool {
        let mut last = self.last.lock();
        let changed = matches!(last.as_ref(), Some(previous) if previous != configuration);
        if last.as_ref() != Some(configuration) {
            *last = Some(configuration.clone());
        }
        changed
    }

    pub fn condition_id(&self) -> ConditionId {
        self.core.condition_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operator_statefulness() {
        assert!(ConditionOperator::LessThan.is_stateful());
        assert!(ConditionOperator::GreaterThan.is_stateful());
        assert!(ConditionOperator::Equals.is_stateful());
        assert!(!ConditionOperator::Changes.is_stateful());
        assert!(!ConditionOperator::ChangesTo.is_stateful());
        assert!(!ConditionOperator::ChangesFrom.is_stateful());
    }

    #[test]
    fn threshold_comparators() {
        let gt = NumericElement::threshold(1, ">", 90.0).unwrap();
        assert!(gt.matches(95.0));
        assert!(!gt.matches(90.0));
        assert!(!gt.matches(85.0));

        let lt = NumericElement::threshold(2, "<", 10.0).unwrap();
        assert!(lt.matches(5.0));
        assert!(!lt.matches(10.0));

        let eq = NumericElement::threshold(3, "=", 42.0).unwrap();
        assert!(eq.matches(42.0));
        assert!(!eq.matches(42.5));
    }

    #[test]
    fn threshold_rejects_non_finite_values() {
        assert!(NumericElement::threshold(1, ">", f64::NAN).is_err());
        assert!(NumericElement::threshold(1, "<", f64::INFINITY).is_err());
        assert!(NumericElement::threshold(1, ">", f64::NEG_INFINITY).is_err());
    }

    #[test]
    fn threshold_rejects_unknown_comparator() {
        assert!(NumericElement::threshold(1, ">=", 1.0).is_err());
        assert!(NumericElement::threshold(1, "!", 1.0).is_err());
    }

    #[test]
    fn baseline_resolves_statistic_at_construction() {
        // 50% of a mean of 100 compiles to a comparison value of 50.0
        let e = NumericElement::baseline(7, "<", 50.0, "mean", None, Some(100.0), None).unwrap();
        assert_eq!(e.comparison_value(), 50.0);
        assert!(e.matches(49.9));
        assert!(!e.matches(50.1));
    }

    #[test]
    fn baseline_rejects_bad_inputs() {
        // unrecognized statistic name
        assert!(NumericElement::baseline(7, "<", 50.0, "median", None, Some(1.0), None).is_err());
        // statistic named but absent
        assert!(NumericElement::baseline(7, "<", 50.0, "max", None, Some(1.0), None).is_err());
        // non-finite product
        assert!(
            NumericElement::baseline(7, "<", f64::INFINITY, "mean", None, Some(1.0), None).is_err()
        );
    }

    #[test]
    fn numeric_change_tracks_last_value() {
        let e = NumericElement::change(9, Some(10.0));
        assert!(!e.matches(10.0));
        assert!(e.matches(11.0));
        assert!(!e.matches(11.0));
        assert!(e.matches(10.0));
    }

    #[test]
    fn numeric_change_with_no_seed_records_first_observation() {
        let e = NumericElement::change(9, None);
        assert!(!e.matches(5.0));
        assert!(e.matches(6.0));
    }

    #[test]
    fn trait_change_semantics() {
        let e = TraitElement::new(4, Some("1.0.2".to_string()));
        assert!(!e.matches("1.0.2"));
        assert!(e.matches("1.0.3"));
        assert!(!e.matches("1.0.3"));
    }

    #[test]
    fn event_severity_and_detail() {
        let plain = EventElement::new(5, EventSeverity::Error, None).unwrap();
        assert!(plain.matches(EventSeverity::Error, "anything"));
        assert!(!plain.matches(EventSeverity::Warn, "anything"));

        let with_detail = EventElement::new(6, EventSeverity::Error, Some("OutOfMemory")).unwrap();
        assert!(with_detail.matches(EventSeverity::Error, "java.lang.OutOfMemoryError at ..."));
        assert!(!with_detail.matches(EventSeverity::Error, "disk full"));
    }

    #[test]
    fn event_rejects_invalid_pattern() {
        assert!(EventElement::new(6, EventSeverity::Error, Some("[unclosed")).is_err());
    }

    #[test]
    fn availability_goes_up_and_down() {
        let up = AvailabilityElement::new(10, "UP", Some(AvailabilityType::Down)).unwrap();
        assert!(up.matches(AvailabilityType::Up));
        // already up, no transition
        assert!(!up.matches(AvailabilityType::Up));

        let down = AvailabilityElement::new(11, "DOWN", Some(AvailabilityType::Up)).unwrap();
        assert!(down.matches(AvailabilityType::Down));
        assert!(!down.matches(AvailabilityType::Down));
        // back up, then down again fires again
        assert!(!down.matches(AvailabilityType::Up));
        assert!(down.matches(AvailabilityType::Down));
    }

    #[test]
    fn availability_any_transition() {
        let e = AvailabilityElement::new(12, "CHANGES", Some(AvailabilityType::Up)).unwrap();
        assert!(e.matches(AvailabilityType::Down));
        assert!(e.matches(AvailabilityType::Up));
        assert!(!e.matches(AvailabilityType::Up));
    }

    #[test]
    fn availability_without_known_state_needs_a_transition() {
        let e = AvailabilityElement::new(13, "UP", None).unwrap();
        // first report establishes state without matching
        assert!(!e.matches(AvailabilityType::Down));
        assert!(e.matches(AvailabilityType::Up));
    }

    #[test]
    fn availability_rejects_unknown_option() {
        assert!(AvailabilityElement::new(13, "FLAPPING", None).is_err());
    }

    #[test]
    fn operation_status_equality() {
        let e = OperationElement::new(14, "FAILURE").unwrap();
        assert!(e.matches(OperationStatus::Failure));
        assert!(!e.matches(OperationStatus::Success));
        assert!(OperationElement::new(14, "EXPLODED").is_err());
    }

    #[test]
    fn resource_config_change_semantics() {
        let seed = json!({"port": 8080});
        let e = ResourceConfigElement::new(15, Some(seed.clone()));
        assert!(!e.matches(&seed));
        assert!(e.matches(&json!({"port": 9090})));
        assert!(!e.matches(&json!({"port": 9090})));
    }
}

//! Per-agent condition partition.
//!
//! Holds every compiled element for one agent: numeric measurement
//! elements (threshold, baseline and change conditions share the one
//! map, distinguished only by operator), trait elements, and event
//! elements. Fully self-contained; the coordinator swaps the whole
//! partition on reload.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::element::{EventElement, NumericElement, TraitElement};
use crate::partition::{load_pages, settle_outcome};
use crate::source::{AlertNotifier, ConditionSource};
use crate::stats::CacheStats;
use crate::types::{
    AgentId, ConditionCategory, ConditionComposite, EventRecord, MeasurementReading, ResourceId,
    ScheduleId, TraitReading,
};

/// All compiled condition state for one agent.
#[derive(Debug)]
pub struct AgentConditionPartition {
    agent_id: AgentId,
    /// Threshold + baseline + change elements, keyed by schedule id
    measurement: HashMap<ScheduleId, Vec<NumericElement>>,
    /// Trait elements, keyed by schedule id
    traits: HashMap<ScheduleId, Vec<TraitElement>>,
    /// Event elements, keyed by resource id
    events: HashMap<ResourceId, Vec<EventElement>>,
}

impl AgentConditionPartition {
    /// Build and fully load a partition for one agent, paging through
    /// every agent-scoped condition category. Element construction
    /// failures are logged and skipped; a source failure aborts the load
    /// and the caller keeps whatever partition was current before.
    pub fn load(
        agent_id: AgentId,
        source: &dyn ConditionSource,
        stats: &mut CacheStats,
    ) -> Result<Self, String> {
        let mut partition = Self {
            agent_id,
            measurement: HashMap::new(),
            traits: HashMap::new(),
            events: HashMap::new(),
        };
        for category in ConditionCategory::AGENT_SCOPED {
            load_pages(source, Some(agent_id), category, |composite| {
                partition.insert(composite, stats)
            })?;
        }
        info!(
            "loaded agent {} partition: {} measurement, {} trait, {} event element(s)",
            agent_id,
            partition.measurement_element_count(),
            partition.trait_element_count(),
            partition.event_element_count()
        );
        Ok(partition)
    }

    /// Compile one composite and append it to the right keyed list.
    fn insert(&mut self, composite: ConditionComposite, stats: &mut CacheStats) {
        let condition_id = composite.condition_id();
        let outcome = match composite {
            ConditionComposite::Threshold {
                condition_id,
                schedule_id,
                comparator,
                threshold,
            } => NumericElement::threshold(condition_id, &comparator, threshold).map(|element| {
                self.measurement.entry(schedule_id).or_default().push(element);
            }),
            ConditionComposite::Baseline {
                condition_id,
                schedule_id,
                comparator,
                percentage,
                statistic,
                baseline_min,
                baseline_mean,
                baseline_max,
            } => NumericElement::baseline(
                condition_id,
                &comparator,
                percentage,
                &statistic,
                baseline_min,
                baseline_mean,
                baseline_max,
            )
            .map(|element| {
                self.measurement.entry(schedule_id).or_default().push(element);
            }),
            ConditionComposite::Change {
                condition_id,
                schedule_id,
                last_value,
            } => {
                let element = NumericElement::change(condition_id, last_value);
                self.measurement.entry(schedule_id).or_default().push(element);
                Ok(())
            }
            ConditionComposite::Trait {
                condition_id,
                schedule_id,
                current_value,
            } => {
                let element = TraitElement::new(condition_id, current_value);
                self.traits.entry(schedule_id).or_default().push(element);
                Ok(())
            }
            ConditionComposite::Event {
                condition_id,
                resource_id,
                severity,
                detail_pattern,
            } => EventElement::new(condition_id, severity, detail_pattern.as_deref()).map(
                |element| {
                    self.events.entry(resource_id).or_default().push(element);
                },
            ),
            other => {
                debug!(
                    "agent {} partition skipping non-agent-scoped composite for condition {}",
                    self.agent_id,
                    other.condition_id()
                );
                return;
            }
        };
        match outcome {
            Ok(()) => stats.created += 1,
            Err(e) => debug!(
                "skipping uncacheable condition {}: {}",
                condition_id, e
            ),
        }
    }

    /// Evaluate a batch of numeric measurement readings.
    pub fn check_measurements(
        &self,
        readings: &[MeasurementReading],
        notifier: &dyn AlertNotifier,
    ) -> CacheStats {
        let mut stats = CacheStats::new();
        for reading in readings {
            let Some(elements) = self.measurement.get(&reading.schedule_id) else {
                continue;
            };
            let value = format!("{:?}", reading.value);
            for element in elements {
                let matched = element.matches(reading.value);
                settle_outcome(
                    &element.core,
                    matched,
                    reading.timestamp_ms,
                    &value,
                    &[],
                    notifier,
                    &mut stats,
                );
            }
        }
        self.finish("measurement", &stats);
        stats
    }

    /// Evaluate a batch of trait readings.
    pub fn check_traits(
        &self,
        readings: &[TraitReading],
        notifier: &dyn AlertNotifier,
    ) -> CacheStats {
        let mut stats = CacheStats::new();
        for reading in readings {
            let Some(elements) = self.traits.get(&reading.schedule_id) else {
                continue;
            };
            for element in elements {
                let matched = element.matches(&reading.value);
                settle_outcome(
                    &element.core,
                    matched,
                    reading.timestamp_ms,
                    &reading.value,
                    &[],
                    notifier,
                    &mut stats,
                );
            }
        }
        self.finish("trait", &stats);
        stats
    }

    /// Evaluate a batch of events observed on one resource.
    pub fn check_events(
        &self,
        resource_id: ResourceId,
        events: &[EventRecord],
        notifier: &dyn AlertNotifier,
    ) -> CacheStats {
        let mut stats = CacheStats::new();
        if let Some(elements) = self.events.get(&resource_id) {
            for event in events {
                let value = event.severity.to_string();
                for element in elements {
                    let matched = element.matches(event.severity, &event.detail);
                    settle_outcome(
                        &element.core,
                        matched,
                        event.timestamp_ms,
                        &value,
                        std::slice::from_ref(&event.detail),
                        notifier,
                        &mut stats,
                    );
                }
            }
        }
        self.finish("event", &stats);
        stats
    }

    fn finish(&self, category: &str, stats: &CacheStats) {
        if stats.errors > 0 {
            warn!(
                "agent {} {} check finished with {} emission failure(s)",
                self.agent_id, category, stats.errors
            );
        }
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn measurement_element_count(&self) -> usize {
        self.measurement.values().map(Vec::len).sum()
    }

    pub fn trait_element_count(&self) -> usize {
        self.traits.values().map(Vec::len).sum()
    }

    pub fn event_element_count(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }
}

//! Global condition partition.
//!
//! The single process-wide partition for condition categories that are
//! not tied to one agent: resource operations (keyed by resource id,
//! then operation definition id), availability transitions, and resource
//! configuration changes. Exactly one instance is current at any time;
//! the coordinator replaces it wholesale on reload.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::element::{AvailabilityElement, OperationElement, ResourceConfigElement};
use crate::partition::{load_pages, settle_outcome};
use crate::source::{AlertNotifier, ConditionSource};
use crate::stats::CacheStats;
use crate::types::{
    AvailabilityChange, ConditionCategory, ConditionComposite, OperationDefinitionId,
    OperationRecord, ResourceConfigUpdate, ResourceId,
};

/// All compiled global-scope condition state.
#[derive(Debug)]
pub struct GlobalConditionPartition {
    /// Operation elements, keyed by resource id then operation definition id
    operations: HashMap<ResourceId, HashMap<OperationDefinitionId, Vec<OperationElement>>>,
    /// Availability elements, keyed by resource id
    availability: HashMap<ResourceId, Vec<AvailabilityElement>>,
    /// Resource configuration elements, keyed by resource id
    configs: HashMap<ResourceId, Vec<ResourceConfigElement>>,
}

impl GlobalConditionPartition {
    /// Build and fully load the global partition, paging through every
    /// global-scoped condition category.
    pub fn load(source: &dyn ConditionSource, stats: &mut CacheStats) -> Result<Self, String> {
        let mut partition = Self {
            operations: HashMap::new(),
            availability: HashMap::new(),
            configs: HashMap::new(),
        };
        for category in ConditionCategory::GLOBAL_SCOPED {
            load_pages(source, None, category, |composite| {
                partition.insert(composite, stats)
            })?;
        }
        info!(
            "loaded global partition: {} operation, {} availability, {} config element(s)",
            partition.operation_element_count(),
            partition.availability_element_count(),
            partition.config_element_count()
        );
        Ok(partition)
    }

    fn insert(&mut self, composite: ConditionComposite, stats: &mut CacheStats) {
        let condition_id = composite.condition_id();
        let outcome = match composite {
            ConditionComposite::Operation {
                condition_id,
                resource_id,
                operation_definition_id,
                status_option,
            } => OperationElement::new(condition_id, &status_option).map(|element| {
                self.operations
                    .entry(resource_id)
                    .or_default()
                    .entry(operation_definition_id)
                    .or_default()
                    .push(element);
            }),
            ConditionComposite::Availability {
                condition_id,
                resource_id,
                option,
                current,
            } => AvailabilityElement::new(condition_id, &option, current).map(|element| {
                self.availability.entry(resource_id).or_default().push(element);
            }),
            ConditionComposite::ResourceConfig {
                condition_id,
                resource_id,
                current,
            } => {
                let element = ResourceConfigElement::new(condition_id, current);
                self.configs.entry(resource_id).or_default().push(element);
                Ok(())
            }
            other => {
                debug!(
                    "global partition skipping agent-scoped composite for condition {}",
                    other.condition_id()
                );
                return;
            }
        };
        match outcome {
            Ok(()) => stats.created += 1,
            Err(e) => debug!("skipping uncacheable condition {}: {}", condition_id, e),
        }
    }

    /// Evaluate a batch of availability transitions.
    pub fn check_availability(
        &self,
        changes: &[AvailabilityChange],
        notifier: &dyn AlertNotifier,
    ) -> CacheStats {
        let mut stats = CacheStats::new();
        for change in changes {
            let Some(elements) = self.availability.get(&change.resource_id) else {
                continue;
            };
            let value = change.current.to_string();
            for element in elements {
                let matched = element.matches(change.current);
                settle_outcome(
                    &element.core,
                    matched,
                    change.timestamp_ms,
                    &value,
                    &[],
                    notifier,
                    &mut stats,
                );
            }
        }
        self.finish("availability", &stats);
        stats
    }

    /// Evaluate one operation-history record.
    pub fn check_operation(
        &self,
        record: &OperationRecord,
        notifier: &dyn AlertNotifier,
    ) -> CacheStats {
        let mut stats = CacheStats::new();
        let elements = self
            .operations
            .get(&record.resource_id)
            .and_then(|by_definition| by_definition.get(&record.operation_definition_id));
        if let Some(elements) = elements {
            let value = record.status.to_string();
            let extra = [record.operation_definition_id.to_string()];
            for element in elements {
                let matched = element.matches(record.status);
                settle_outcome(
                    &element.core,
                    matched,
                    record.timestamp_ms,
                    &value,
                    &extra,
                    notifier,
                    &mut stats,
                );
            }
        }
        self.finish("operation", &stats);
        stats
    }

    /// Evaluate one resource configuration update.
    pub fn check_resource_configuration(
        &self,
        update: &ResourceConfigUpdate,
        notifier: &dyn AlertNotifier,
    ) -> CacheStats {
        let mut stats = CacheStats::new();
        if let Some(elements) = self.configs.get(&update.resource_id) {
            let value = update.configuration.to_string();
            for element in elements {
                let matched = element.matches(&update.configuration);
                settle_outcome(
                    &element.core,
                    matched,
                    update.timestamp_ms,
                    &value,
                    &[],
                    notifier,
                    &mut stats,
                );
            }
        }
        self.finish("resource_config", &stats);
        stats
    }

    fn finish(&self, category: &str, stats: &CacheStats) {
        if stats.errors > 0 {
            warn!(
                "global {} check finished with {} emission failure(s)",
                category, stats.errors
            );
        }
    }

    pub fn operation_element_count(&self) -> usize {
        self.operations
            .values()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum()
    }

    pub fn availability_element_count(&self) -> usize {
        self.availability.values().map(Vec::len).sum()
    }

    pub fn config_element_count(&self) -> usize {
        self.configs.values().map(Vec::len).sum()
    }
}

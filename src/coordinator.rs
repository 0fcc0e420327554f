//! Cache coordinator.
//!
//! [`AlertConditionCache`] owns the single global partition and a lazily
//! grown map of per-agent partitions, each behind its own read/write
//! lock. Every incoming check is routed to exactly one partition; checks
//! run under the partition's read lock (notification emission included),
//! reloads rebuild the replacement partition under the write lock and
//! swap it in. Locks, once created for an agent id, live for the
//! lifetime of the coordinator; only the partition they guard is
//! replaced.
//!
//! No check entry point ever returns an error or panics to its caller:
//! the callers are processing live monitoring streams that must keep
//! flowing regardless of cache faults.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::error;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};

use crate::partition::{AgentConditionPartition, GlobalConditionPartition};
use crate::source::{AgentResolver, AlertNotifier, ConditionSource};
use crate::stats::CacheStats;
use crate::types::{
    AgentId, AvailabilityChange, CacheName, CacheSizes, EventRecord, MeasurementReading,
    OperationRecord, ResourceConfigUpdate, ResourceId, ScheduleId, TraitReading,
};

/// One per-agent partition slot: the lock is permanent, the partition
/// inside is swapped wholesale.
type AgentSlot = Arc<RwLock<Option<Arc<AgentConditionPartition>>>>;

/// The process-wide condition cache service.
///
/// Explicitly constructed with its collaborators and owned by the
/// hosting process; there is no ambient global instance.
pub struct AlertConditionCache {
    source: Arc<dyn ConditionSource>,
    resolver: Arc<dyn AgentResolver>,
    notifier: Arc<dyn AlertNotifier>,
    /// The single global partition and its lock
    global: RwLock<Option<Arc<GlobalConditionPartition>>>,
    /// Lazily grown, monotonic lock registry; guarded by a short mutex
    /// section so exactly one slot ever exists per agent id
    agents: Mutex<HashMap<AgentId, AgentSlot>>,
}

impl AlertConditionCache {
    pub fn new(
        source: Arc<dyn ConditionSource>,
        resolver: Arc<dyn AgentResolver>,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        Self {
            source,
            resolver,
            notifier,
            global: RwLock::new(None),
            agents: Mutex::new(HashMap::new()),
        }
    }

    // ============================================================================================
    // CHECK ENTRY POINTS
    // ============================================================================================

    /// Evaluate a batch of numeric measurement readings, routed per
    /// schedule to the owning agent's partition.
    pub fn check_measurements(&self, readings: &[MeasurementReading]) -> CacheStats {
        self.guarded("measurement", || {
            let mut stats = CacheStats::new();
            let grouped = self.group_by_agent(readings, |r| r.schedule_id);
            for (agent_id, batch) in grouped {
                stats.absorb(self.with_agent_partition(agent_id, |partition| {
                    partition.check_measurements(&batch, self.notifier.as_ref())
                }));
            }
            stats
        })
    }

    /// Evaluate a batch of trait readings.
    pub fn check_traits(&self, readings: &[TraitReading]) -> CacheStats {
        self.guarded("trait", || {
            let mut stats = CacheStats::new();
            let grouped = self.group_by_agent(readings, |r| r.schedule_id);
            for (agent_id, batch) in grouped {
                stats.absorb(self.with_agent_partition(agent_id, |partition| {
                    partition.check_traits(&batch, self.notifier.as_ref())
                }));
            }
            stats
        })
    }

    /// Evaluate a batch of events observed on one resource.
    pub fn check_events(&self, resource_id: ResourceId, events: &[EventRecord]) -> CacheStats {
        self.guarded("event", || {
            let Some(agent_id) = self.resolver.agent_for_resource(resource_id) else {
                error!(
                    "cannot resolve owning agent for resource {}; dropping {} event(s)",
                    resource_id,
                    events.len()
                );
                return CacheStats::new();
            };
            self.with_agent_partition(agent_id, |partition| {
                partition.check_events(resource_id, events, self.notifier.as_ref())
            })
        })
    }

    /// Evaluate a batch of availability transitions against the global
    /// partition.
    pub fn check_availability(&self, changes: &[AvailabilityChange]) -> CacheStats {
        self.guarded("availability", || {
            self.with_global_partition(|partition| {
                partition.check_availability(changes, self.notifier.as_ref())
            })
        })
    }

    /// Evaluate one operation-history record against the global partition.
    pub fn check_operation_history(&self, record: &OperationRecord) -> CacheStats {
        self.guarded("operation", || {
            self.with_global_partition(|partition| {
                partition.check_operation(record, self.notifier.as_ref())
            })
        })
    }

    /// Evaluate one resource configuration update against the global
    /// partition.
    pub fn check_resource_configuration(&self, update: &ResourceConfigUpdate) -> CacheStats {
        self.guarded("resource_config", || {
            self.with_global_partition(|partition| {
                partition.check_resource_configuration(update, self.notifier.as_ref())
            })
        })
    }

    // ============================================================================================
    // RELOAD
    // ============================================================================================

    /// Rebuild the global partition and swap it in. On load failure the
    /// prior partition (if any) stays current.
    pub fn reload_global(&self) -> CacheStats {
        self.guarded("global reload", || {
            let mut stats = CacheStats::new();
            let mut slot = self.global.write();
            match GlobalConditionPartition::load(self.source.as_ref(), &mut stats) {
                Ok(partition) => *slot = Some(Arc::new(partition)),
                Err(e) => {
                    error!("global partition reload failed, keeping current state: {}", e);
                    stats.errors += 1;
                }
            }
            stats
        })
    }

    /// Rebuild one agent's partition and swap it in, creating the slot
    /// if this agent was never seen. On load failure the prior partition
    /// stays current.
    pub fn reload_agent(&self, agent_id: AgentId) -> CacheStats {
        self.guarded("agent reload", || {
            let mut stats = CacheStats::new();
            let slot = self.agent_slot(agent_id);
            let mut guard = slot.write();
            match AgentConditionPartition::load(agent_id, self.source.as_ref(), &mut stats) {
                Ok(partition) => *guard = Some(Arc::new(partition)),
                Err(e) => {
                    error!(
                        "agent {} partition reload failed, keeping current state: {}",
                        agent_id, e
                    );
                    stats.errors += 1;
                }
            }
            stats
        })
    }

    // ============================================================================================
    // SIZE REPORTING
    // ============================================================================================

    /// Number of elements currently held in one keyed collection, summed
    /// across all current partitions.
    pub fn cache_size(&self, name: CacheName) -> usize {
        match name {
            CacheName::Measurement => {
                self.sum_agent_partitions(AgentConditionPartition::measurement_element_count)
            }
            CacheName::MeasurementTrait => {
                self.sum_agent_partitions(AgentConditionPartition::trait_element_count)
            }
            CacheName::Event => {
                self.sum_agent_partitions(AgentConditionPartition::event_element_count)
            }
            CacheName::Availability => {
                self.map_global_partition(GlobalConditionPartition::availability_element_count)
            }
            CacheName::Operation => {
                self.map_global_partition(GlobalConditionPartition::operation_element_count)
            }
            CacheName::ResourceConfig => {
                self.map_global_partition(GlobalConditionPartition::config_element_count)
            }
        }
    }

    /// Element counts for every keyed collection, by collection name.
    pub fn all_cache_sizes(&self) -> CacheSizes {
        CacheName::ALL
            .iter()
            .map(|name| (name.to_string(), self.cache_size(*name)))
            .collect()
    }

    // ============================================================================================
    // PARTITION ACCESS
    // ============================================================================================

    /// Get or create the slot (and its permanent lock) for one agent id.
    fn agent_slot(&self, agent_id: AgentId) -> AgentSlot {
        let mut agents = self.agents.lock();
        agents
            .entry(agent_id)
            .or_insert_with(|| Arc::new(RwLock::new(None)))
            .clone()
    }

    /// Run `f` against the agent's current partition under its read
    /// lock, loading the partition first if this is the agent's first
    /// reference. The write guard is downgraded after publication, so
    /// concurrent first-touch readers block until the load completes and
    /// then all evaluate against the same snapshot.
    fn with_agent_partition<F>(&self, agent_id: AgentId, f: F) -> CacheStats
    where
        F: FnOnce(&AgentConditionPartition) -> CacheStats,
    {
        let slot = self.agent_slot(agent_id);
        {
            let guard = slot.read();
            if let Some(partition) = guard.as_ref() {
                return f(partition);
            }
        }

        let mut stats = CacheStats::new();
        let mut guard = slot.write();
        if guard.is_none() {
            match AgentConditionPartition::load(agent_id, self.source.as_ref(), &mut stats) {
                Ok(partition) => *guard = Some(Arc::new(partition)),
                Err(e) => {
                    error!("agent {} partition load failed: {}", agent_id, e);
                    stats.errors += 1;
                    return stats;
                }
            }
        }
        let guard = RwLockWriteGuard::downgrade(guard);
        if let Some(partition) = guard.as_ref() {
            stats.absorb(f(partition));
        }
        stats
    }

    /// Run `f` against the current global partition under its read lock,
    /// loading it first if absent.
    fn with_global_partition<F>(&self, f: F) -> CacheStats
    where
        F: FnOnce(&GlobalConditionPartition) -> CacheStats,
    {
        {
            let guard = self.global.read();
            if let Some(partition) = guard.as_ref() {
                return f(partition);
            }
        }

        let mut stats = CacheStats::new();
        let mut guard = self.global.write();
        if guard.is_none() {
            match GlobalConditionPartition::load(self.source.as_ref(), &mut stats) {
                Ok(partition) => *guard = Some(Arc::new(partition)),
                Err(e) => {
                    error!("global partition load failed: {}", e);
                    stats.errors += 1;
                    return stats;
                }
            }
        }
        let guard = RwLockWriteGuard::downgrade(guard);
        if let Some(partition) = guard.as_ref() {
            stats.absorb(f(partition));
        }
        stats
    }

    /// Group a batch of schedule-keyed data by owning agent, logging and
    /// dropping entries whose agent cannot be resolved.
    fn group_by_agent<T, K>(&self, items: &[T], schedule_of: K) -> HashMap<AgentId, Vec<T>>
    where
        T: Clone,
        K: Fn(&T) -> ScheduleId,
    {
        let mut grouped: HashMap<AgentId, Vec<T>> = HashMap::new();
        for item in items {
            let schedule_id = schedule_of(item);
            match self.resolver.agent_for_schedule(schedule_id) {
                Some(agent_id) => grouped.entry(agent_id).or_default().push(item.clone()),
                None => {
                    error!(
                        "cannot resolve owning agent for schedule {}; dropping datum",
                        schedule_id
                    );
                }
            }
        }
        grouped
    }

    fn sum_agent_partitions<F>(&self, count: F) -> usize
    where
        F: Fn(&AgentConditionPartition) -> usize,
    {
        let slots: Vec<AgentSlot> = self.agents.lock().values().cloned().collect();
        slots
            .iter()
            .map(|slot| slot.read().as_ref().map_or(0, |p| count(p)))
            .sum()
    }

    fn map_global_partition<F>(&self, count: F) -> usize
    where
        F: Fn(&GlobalConditionPartition) -> usize,
    {
        self.global.read().as_ref().map_or(0, |p| count(p))
    }

    /// Outermost containment boundary: a panic anywhere inside a check
    /// batch is logged and converted into empty statistics.
    fn guarded<F>(&self, label: &str, body: F) -> CacheStats
    where
        F: FnOnce() -> CacheStats,
    {
        match catch_unwind(AssertUnwindSafe(body)) {
            Ok(stats) => stats,
            Err(_) => {
                error!("{} check aborted by panic; returning empty statistics", label);
                CacheStats::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConditionCategory, ConditionComposite, ConditionPage, PageControl};
    use parking_lot::Mutex as PlMutex;

    /// Source serving a fixed set of composites, one page per category.
    struct FixedSource {
        composites: Vec<ConditionComposite>,
    }

    impl ConditionSource for FixedSource {
        fn candidate_conditions(
            &self,
            _agent_id: Option<AgentId>,
            category: ConditionCategory,
            page: PageControl,
        ) -> Result<ConditionPage, String> {
            if page.page_number > 0 {
                return Ok(ConditionPage::default());
            }
            let items: Vec<ConditionComposite> = self
                .composites
                .iter()
                .filter(|c| category_of(c) == category)
                .cloned()
                .collect();
            let total = items.len();
            Ok(ConditionPage { items, total })
        }
    }

    fn category_of(c: &ConditionComposite) -> ConditionCategory {
        match c {
            ConditionComposite::Threshold { .. } => ConditionCategory::Threshold,
            ConditionComposite::Baseline { .. } => ConditionCategory::Baseline,
            ConditionComposite::Change { .. } => ConditionCategory::Change,
            ConditionComposite::Trait { .. } => ConditionCategory::Trait,
            ConditionComposite::Event { .. } => ConditionCategory::Event,
            ConditionComposite::Availability { .. } => ConditionCategory::Availability,
            ConditionComposite::Operation { .. } => ConditionCategory::Operation,
            ConditionComposite::ResourceConfig { .. } => ConditionCategory::ResourceConfig,
        }
    }

    /// Resolver mapping every schedule and resource to one agent.
    struct SingleAgentResolver(AgentId);

    impl AgentResolver for SingleAgentResolver {
        fn agent_for_schedule(&self, _schedule_id: ScheduleId) -> Option<AgentId> {
            Some(self.0)
        }
        fn agent_for_resource(&self, _resource_id: ResourceId) -> Option<AgentId> {
            Some(self.0)
        }
    }

    /// Notifier recording every emission.
    #[derive(Default)]
    struct RecordingNotifier {
        activations: PlMutex<Vec<(i32, String)>>,
        deactivations: PlMutex<Vec<i32>>,
    }

    impl AlertNotifier for RecordingNotifier {
        fn emit_activation(
            &self,
            condition_id: i32,
            _timestamp_ms: u64,
            value: &str,
            _extra: &[String],
        ) -> Result<(), String> {
            self.activations.lock().push((condition_id, value.to_string()));
            Ok(())
        }
        fn emit_deactivation(&self, condition_id: i32, _timestamp_ms: u64) -> Result<(), String> {
            self.deactivations.lock().push(condition_id);
            Ok(())
        }
    }

    fn cache_with(
        composites: Vec<ConditionComposite>,
    ) -> (AlertConditionCache, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let cache = AlertConditionCache::new(
            Arc::new(FixedSource { composites }),
            Arc::new(SingleAgentResolver(1)),
            notifier.clone(),
        );
        (cache, notifier)
    }

    #[test]
    fn first_check_lazily_loads_the_agent_partition() {
        let (cache, notifier) = cache_with(vec![ConditionComposite::Threshold {
            condition_id: 100,
            schedule_id: 42,
            comparator: ">".to_string(),
            threshold: 90.0,
        }]);

        let stats = cache.check_measurements(&[MeasurementReading {
            schedule_id: 42,
            value: 95.0,
            timestamp_ms: 1_000,
        }]);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.matched, 1);
        assert_eq!(notifier.activations.lock().as_slice(), &[(100, "95.0".to_string())]);
    }

    #[test]
    fn global_categories_route_to_the_global_partition() {
        let (cache, notifier) = cache_with(vec![ConditionComposite::Operation {
            condition_id: 7,
            resource_id: 3,
            operation_definition_id: 9,
            status_option: "FAILURE".to_string(),
        }]);

        let stats = cache.check_operation_history(&OperationRecord {
            resource_id: 3,
            operation_definition_id: 9,
            status: crate::types::OperationStatus::Failure,
            timestamp_ms: 5,
        });
        assert_eq!(stats.matched, 1);
        assert_eq!(notifier.activations.lock().len(), 1);
        assert_eq!(cache.cache_size(CacheName::Operation), 1);
    }

    #[test]
    fn cache_sizes_cover_all_collections() {
        let (cache, _notifier) = cache_with(vec![
            ConditionComposite::Threshold {
                condition_id: 1,
                schedule_id: 10,
                comparator: "<".to_string(),
                threshold: 5.0,
            },
            ConditionComposite::Availability {
                condition_id: 2,
                resource_id: 20,
                option: "DOWN".to_string(),
                current: Some(crate::types::AvailabilityType::Up),
            },
        ]);

        // touch both scopes so the partitions exist
        cache.check_measurements(&[MeasurementReading {
            schedule_id: 10,
            value: 9.0,
            timestamp_ms: 1,
        }]);
        cache.check_availability(&[AvailabilityChange {
            resource_id: 20,
            current: crate::types::AvailabilityType::Up,
            timestamp_ms: 1,
        }]);

        let sizes = cache.all_cache_sizes();
        assert_eq!(sizes.len(), CacheName::ALL.len());
        assert_eq!(sizes["measurement"], 1);
        assert_eq!(sizes["availability"], 1);
        assert_eq!(sizes["event"], 0);
    }

    #[test]
    fn reload_failure_keeps_the_previous_partition() {
        struct FlakySource {
            fail: PlMutex<bool>,
        }
        impl ConditionSource for FlakySource {
            fn candidate_conditions(
                &self,
                _agent_id: Option<AgentId>,
                category: ConditionCategory,
                page: PageControl,
            ) -> Result<ConditionPage, String> {
                if *self.fail.lock() {
                    return Err("database unavailable".to_string());
                }
                if page.page_number > 0 || category != ConditionCategory::Threshold {
                    return Ok(ConditionPage::default());
                }
                Ok(ConditionPage {
                    items: vec![ConditionComposite::Threshold {
                        condition_id: 55,
                        schedule_id: 8,
                        comparator: ">".to_string(),
                        threshold: 1.0,
                    }],
                    total: 1,
                })
            }
        }

        let source = Arc::new(FlakySource {
            fail: PlMutex::new(false),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let cache = AlertConditionCache::new(
            source.clone(),
            Arc::new(SingleAgentResolver(1)),
            notifier.clone(),
        );

        assert_eq!(cache.reload_agent(1).created, 1);
        assert_eq!(cache.cache_size(CacheName::Measurement), 1);

        *source.fail.lock() = true;
        let stats = cache.reload_agent(1);
        assert_eq!(stats.errors, 1);
        // prior partition still serves checks
        let stats = cache.check_measurements(&[MeasurementReading {
            schedule_id: 8,
            value: 2.0,
            timestamp_ms: 1,
        }]);
        assert_eq!(stats.matched, 1);
    }

    #[test]
    fn unresolvable_agent_yields_empty_stats() {
        struct NoResolver;
        impl AgentResolver for NoResolver {
            fn agent_for_schedule(&self, _schedule_id: ScheduleId) -> Option<AgentId> {
                None
            }
            fn agent_for_resource(&self, _resource_id: ResourceId) -> Option<AgentId> {
                None
            }
        }

        let notifier = Arc::new(RecordingNotifier::default());
        let cache = AlertConditionCache::new(
            Arc::new(FixedSource { composites: vec![] }),
            Arc::new(NoResolver),
            notifier.clone(),
        );

        let stats = cache.check_measurements(&[MeasurementReading {
            schedule_id: 1,
            value: 1.0,
            timestamp_ms: 1,
        }]);
        assert_eq!(stats.matched, 0);
        assert_eq!(stats.errors, 0);
        assert!(notifier.activations.lock().is_empty());

        let stats = cache.check_events(
            99,
            &[EventRecord {
                severity: crate::types::EventSeverity::Error,
                detail: "boom".to_string(),
                timestamp_ms: 1,
            }],
        );
        assert_eq!(stats.matched, 0);
    }
}

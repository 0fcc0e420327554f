//! Condition repository partitions.
//!
//! A partition owns the keyed cache-element collections for one scope
//! (one agent, or the single global scope), loads itself from the
//! condition source at construction, and exposes category-specific check
//! entry points. Partitions are rebuilt wholesale and swapped by the
//! coordinator; they are never patched in place.

pub mod agent;
pub mod global;

pub use agent::AgentConditionPartition;
pub use global::GlobalConditionPartition;

use std::sync::atomic::Ordering;

use log::{debug, warn};

use crate::element::ElementCore;
use crate::source::{AlertNotifier, ConditionSource};
use crate::stats::CacheStats;
use crate::types::{AgentId, ConditionCategory, ConditionComposite, PageControl, LOAD_PAGE_SIZE};

/// Apply the match outcome for one element: activate on every positive
/// match, deactivate exactly once when a stateful element stops matching.
///
/// Emission failures are logged and counted, never propagated; the
/// common no-match-while-inactive path performs no work at all.
pub(crate) fn settle_outcome(
    core: &ElementCore,
    matched: bool,
    timestamp_ms: u64,
    value: &str,
    extra: &[String],
    notifier: &dyn AlertNotifier,
    stats: &mut CacheStats,
) {
    if matched {
        // Re-notify on every match; the flag itself is idempotent
        core.active.store(true, Ordering::Relaxed);
        stats.matched += 1;
        if let Err(e) = notifier.emit_activation(core.condition_id, timestamp_ms, value, extra) {
            warn!(
                "failed to emit activation for condition {}: {}",
                core.condition_id, e
            );
            stats.errors += 1;
        }
    } else if core.operator.is_stateful() && core.active.swap(false, Ordering::Relaxed) {
        if let Err(e) = notifier.emit_deactivation(core.condition_id, timestamp_ms) {
            warn!(
                "failed to emit deactivation for condition {}: {}",
                core.condition_id, e
            );
            stats.errors += 1;
        }
    }
}

/// Drive a full paged scan of one condition category, handing every
/// composite to `insert`. Pages continue until the source reports no
/// more rows or the reported total has been reached.
pub(crate) fn load_pages<F>(
    source: &dyn ConditionSource,
    agent_id: Option<AgentId>,
    category: ConditionCategory,
    mut insert: F,
) -> Result<(), String>
where
    F: FnMut(ConditionComposite),
{
    let mut page_number = 0;
    let mut fetched = 0usize;
    loop {
        let page = source.candidate_conditions(
            agent_id,
            category,
            PageControl::new(page_number, LOAD_PAGE_SIZE),
        )?;
        let count = page.items.len();
        if count == 0 {
            break;
        }
        fetched += count;
        for composite in page.items {
            insert(composite);
        }
        if fetched >= page.total {
            break;
        }
        page_number += 1;
    }
    debug!(
        "loaded {} {} composite(s) for agent {:?}",
        fetched, category, agent_id
    );
    Ok(())
}

//! Last-resort guard that keeps every reported snapshot structurally complete.

use crate::baseline::Baseline;
use fleetmon_common::types::CollectionOutcome;

/// Applies the fallback policy to a merged outcome.
///
/// * If every attempted probe failed, or fewer than `baseline.min_keys`
///   canonical keys were populated, the metrics are replaced by the baseline
///   snapshot. Dynamic keys (per-queue metrics and the like) do not count.
/// * Otherwise canonical keys that no probe produced are filled from the
///   baseline and listed in `backfilled`.
///
/// Probe errors are kept in both cases.
pub fn apply(mut outcome: CollectionOutcome, baseline: &Baseline, collector: &str) -> CollectionOutcome {
    let populated = baseline
        .snapshot
        .keys()
        .filter(|k| outcome.metrics.contains_key(k))
        .count();

    if outcome.all_failed() || populated < baseline.min_keys {
        let failed: Vec<&str> = outcome.errors.iter().map(|e| e.source.as_str()).collect();
        tracing::warn!(
            collector,
            populated,
            min_keys = baseline.min_keys,
            attempted = outcome.attempted,
            failed = ?failed,
            "Too few metrics collected, substituting baseline snapshot"
        );
        outcome.metrics = baseline.snapshot.clone();
        outcome.backfilled.clear();
        outcome.fallback = true;
        return outcome;
    }

    let missing = outcome.metrics.missing_from(&baseline.snapshot);
    if !missing.is_empty() {
        tracing::warn!(
            collector,
            count = missing.len(),
            keys = ?missing,
            "Canonical metrics missing, filling from baseline"
        );
        for key in &missing {
            if let Some(value) = baseline.snapshot.get(key) {
                outcome.metrics.insert(key.clone(), value.clone());
            }
        }
        outcome.backfilled = missing;
    }

    outcome
}

//! Statistical reducers collapsing a sample window to one trusted value.
//!
//! Reducer per field kind:
//! - discrete/structured fields: [`mode`] over canonical serializations;
//! - continuous timing fields: [`median`];
//! - append-only log fields: [`dedup_union`] across all window samples.

use crate::{types::Sample, utils::json_canonical};
use serde_json::Value;
use std::collections::BTreeMap;

/// Statistical mode under structural equality.
///
/// Groups samples by canonical form and returns the most frequent one. Ties
/// for the highest count break deterministically to the lexicographically
/// smallest canonical serialization. A degenerate window (more than one
/// sample with no repeats) has no mode and returns `None`; a single-sample
/// window trivially wins.
#[must_use]
pub fn mode(samples: &[Sample]) -> Option<Sample> {
    let (winner, count) = plurality_counted(samples)?;
    if samples.len() > 1 && count < 2 {
        return None;
    }
    Some(winner)
}

/// Plurality vote: the most frequent sample with no degenerate-window rule.
///
/// The bootstrap vote uses this form: when every response is distinct the
/// deterministic tie-break still picks a winner rather than failing the
/// attempt.
#[must_use]
pub fn plurality(samples: &[Sample]) -> Option<Sample> {
    plurality_counted(samples).map(|(winner, _)| winner)
}

fn plurality_counted(samples: &[Sample]) -> Option<(Sample, usize)> {
    // BTreeMap keys are canonical forms, so iteration order is the
    // tie-break order.
    let mut groups: BTreeMap<String, (usize, &Sample)> = BTreeMap::new();
    for sample in samples {
        let entry = groups.entry(sample.canonical()).or_insert((0, sample));
        entry.0 += 1;
    }
    groups
        .iter()
        .max_by(|(key_a, (count_a, _)), (key_b, (count_b, _))| {
            count_a.cmp(count_b).then_with(|| key_b.cmp(key_a))
        })
        .map(|(_, (count, winner))| ((*winner).clone(), *count))
}

/// Median of a continuous series; even-length series average the two middle
/// values. Returns `None` for an empty series.
#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Deduplicating union for append-only log fields.
///
/// Every window sample is itself a list of events; the reduction is the
/// union of all events observed by any collector, deduplicated
/// structurally and ordered by canonical form. Non-list samples are
/// ignored. Returns `None` for an empty window, so the caller skips the
/// write outright.
#[must_use]
pub fn dedup_union(samples: &[Sample]) -> Option<Value> {
    if samples.is_empty() {
        return None;
    }
    let mut merged: BTreeMap<String, Value> = BTreeMap::new();
    for sample in samples {
        if let Value::Array(events) = sample.value() {
            for event in events {
                merged.insert(json_canonical::canonical_string(event), event.clone());
            }
        }
    }
    Some(Value::Array(merged.into_values().collect()))
}

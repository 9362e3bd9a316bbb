use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::models::{Metric, MetricKind, Platform, PlatformSample};

/// Year-over-year delta of `current` against `previous`, rounded to one
/// decimal place. `None` when there is no usable baseline.
///
/// - `Metric::Count`: `((current - previous) / previous) * 100`
/// - `Metric::Rate`: `(current - previous) * 100`, for fractional rates
pub fn compare(current: Metric, previous: f64) -> Option<f64> {
    if previous == 0.0 || !previous.is_finite() {
        return None;
    }
    let delta = match current {
        Metric::Count(value) => (value - previous) / previous * 100.0,
        Metric::Rate(value) => (value - previous) * 100.0,
    };
    delta.is_finite().then(|| round1(delta))
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// `part` as a percentage of `base`; zero when `base` is zero.
pub fn percent_of(part: f64, base: f64) -> f64 {
    if base == 0.0 {
        0.0
    } else {
        part / base * 100.0
    }
}

/// A sample per platform. Platforms missing from `previous` get no baseline.
pub fn compare_platforms(
    kind: MetricKind,
    current: &BTreeMap<Platform, f64>,
    previous: &BTreeMap<Platform, f64>,
) -> Vec<PlatformSample> {
    Platform::ALL
        .iter()
        .map(|platform| {
            let now = current.get(platform).copied().unwrap_or(0.0);
            let before = previous.get(platform).copied();
            PlatformSample {
                platform: *platform,
                current: now,
                previous: before,
                yoy_change: before.and_then(|b| compare(kind.of(now), b)),
                kind,
            }
        })
        .collect()
}

/// Year-over-year movement of one source identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceChange {
    pub source: String,
    pub current: f64,
    pub previous: f64,
    pub change: f64,
    pub percent_change: Option<f64>,
}

/// Changes over the union of both periods' identifiers, largest current
/// volume first.
pub fn compare_sources(
    current: &BTreeMap<String, f64>,
    previous: &BTreeMap<String, f64>,
) -> Vec<SourceChange> {
    let sources: HashSet<&String> = current.keys().chain(previous.keys()).collect();

    let mut changes: Vec<SourceChange> = sources
        .into_iter()
        .map(|source| {
            let now = current.get(source).copied().unwrap_or(0.0);
            let before = previous.get(source).copied().unwrap_or(0.0);
            SourceChange {
                source: source.clone(),
                current: now,
                previous: before,
                change: now - before,
                percent_change: compare(Metric::Count(now), before),
            }
        })
        .collect();

    changes.sort_by(|a, b| {
        b.current
            .partial_cmp(&a.current)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source.cmp(&b.source))
    });
    changes
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Platform segment of an engagement chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    App,
    Web,
    Combined,
}

impl Platform {
    /// Row-matching order: a line is offered to App, then Web, then Combined.
    pub const ALL: [Platform; 3] = [Platform::App, Platform::Web, Platform::Combined];

    pub fn label(self) -> &'static str {
        match self {
            Platform::App => "App",
            Platform::Web => "Web",
            Platform::Combined => "Combined",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Volumes and averages; deltas are relative percentage change.
    Count,
    /// Fractional rates such as conversion; deltas are percentage points.
    Rate,
}

impl MetricKind {
    pub fn of(self, value: f64) -> Metric {
        match self {
            MetricKind::Count => Metric::Count(value),
            MetricKind::Rate => Metric::Rate(value),
        }
    }

    /// Unit suffix used when rendering a delta of this kind.
    pub fn delta_unit(self) -> &'static str {
        match self {
            MetricKind::Count => "%",
            MetricKind::Rate => " ppts",
        }
    }
}

/// A measured value tagged with the semantics its delta must use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Metric {
    Count(f64),
    Rate(f64),
}

impl Metric {
    pub fn value(self) -> f64 {
        match self {
            Metric::Count(v) | Metric::Rate(v) => v,
        }
    }

    pub fn kind(self) -> MetricKind {
        match self {
            Metric::Count(_) => MetricKind::Count,
            Metric::Rate(_) => MetricKind::Rate,
        }
    }
}

/// One platform's current value, prior-year value and year-over-year delta.
///
/// `yoy_change` is `None` when the prior value is zero or absent, which is
/// distinct from `Some(0.0)` ("no change").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformSample {
    pub platform: Platform,
    pub current: f64,
    pub previous: Option<f64>,
    pub yoy_change: Option<f64>,
    pub kind: MetricKind,
}

impl PlatformSample {
    pub fn is_rate(&self) -> bool {
        self.kind == MetricKind::Rate
    }
}

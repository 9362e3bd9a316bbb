use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compare::compare_platforms;
use crate::extract::{extract, extract_paired, PlatformMatchers};
use crate::models::{MetricKind, Platform, PlatformSample};
use crate::report::format_count;
use crate::week::WeekPeriod;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub kind: MetricKind,
    /// Cells read like `3.1%`; values are divided by 100 so rates stay fractional.
    #[serde(default)]
    pub percent_formatted: bool,
}

impl MetricDefinition {
    pub fn count(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Count,
            percent_formatted: false,
        }
    }

    pub fn rate(name: impl Into<String>, percent_formatted: bool) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Rate,
            percent_formatted,
        }
    }

    fn scale(&self, values: BTreeMap<Platform, f64>) -> BTreeMap<Platform, f64> {
        if !self.percent_formatted {
            return values;
        }
        values.into_iter().map(|(p, v)| (p, v / 100.0)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricComparison {
    pub name: String,
    pub kind: MetricKind,
    pub samples: Vec<PlatformSample>,
}

impl MetricComparison {
    pub fn sample(&self, platform: Platform) -> Option<&PlatformSample> {
        self.samples.iter().find(|s| s.platform == platform)
    }

    /// `3.1%` for rates, `1,234` for whole counts, `2.35` for averages.
    pub fn display_value(&self, value: f64) -> String {
        match self.kind {
            MetricKind::Rate => format!("{:.1}%", value * 100.0),
            MetricKind::Count if value.fract() == 0.0 => format_count(value),
            MetricKind::Count => format!("{value:.2}"),
        }
    }

    /// `sessions up 5.2% YoY (1,234 vs 1,173)` for the given platform, or
    /// `None` when there is no baseline.
    pub fn yoy_phrase(&self, platform: Platform) -> Option<String> {
        let sample = self.sample(platform)?;
        let change = sample.yoy_change?;
        let previous = sample.previous?;
        let direction = if change > 0.0 { "up" } else { "down" };
        Some(format!(
            "{} {} {:.1}{} YoY ({} vs {})",
            self.name,
            direction,
            change.abs(),
            self.kind.delta_unit(),
            self.display_value(sample.current),
            self.display_value(previous)
        ))
    }
}

/// Compare a metric's current-week payload with the prior-year payload.
/// The prior payload is read at `week.year_over_year()`.
pub fn compare_metric(
    definition: &MetricDefinition,
    current_payload: &str,
    previous_payload: &str,
    week: &WeekPeriod,
    matchers: &PlatformMatchers,
) -> MetricComparison {
    let current = definition.scale(extract(current_payload, week, matchers));
    let previous = definition.scale(extract(previous_payload, &week.year_over_year(), matchers));
    debug!(metric = %definition.name, ?current, ?previous, "Compared metric");

    MetricComparison {
        name: definition.name.clone(),
        kind: definition.kind,
        samples: compare_platforms(definition.kind, &current, &previous),
    }
}

/// Compare a metric from one chart that carries its own prior period.
pub fn compare_paired_metric(
    definition: &MetricDefinition,
    payload: &str,
    matchers: &PlatformMatchers,
    previous_marker: &str,
) -> MetricComparison {
    let paired = extract_paired(payload, matchers, previous_marker);
    let current = definition.scale(paired.iter().map(|(p, v)| (*p, v.current)).collect());
    let previous = definition.scale(paired.iter().map(|(p, v)| (*p, v.previous)).collect());

    MetricComparison {
        name: definition.name.clone(),
        kind: definition.kind,
        samples: compare_platforms(definition.kind, &current, &previous),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementReport {
    pub period: WeekPeriod,
    pub metrics: Vec<MetricComparison>,
}

impl EngagementReport {
    pub fn new(period: WeekPeriod, metrics: Vec<MetricComparison>) -> Self {
        Self { period, metrics }
    }

    /// One sentence joining the combined-platform phrase of each metric.
    pub fn headline(&self) -> Option<String> {
        let items: Vec<String> = self
            .metrics
            .iter()
            .filter_map(|m| m.yoy_phrase(Platform::Combined))
            .collect();

        let sentence = match items.as_slice() {
            [] => return None,
            [only] => capitalize(only),
            [first, second] => format!("{}, {}", capitalize(first), second),
            [first, middle @ .., last] => {
                let mut text = capitalize(first);
                for item in middle {
                    text.push_str(", ");
                    text.push_str(item);
                }
                text.push_str(", and ");
                text.push_str(last);
                text
            }
        };
        Some(format!("{sentence}."))
    }

    /// Share of volume per platform, leading with the platform whose
    /// volume-weighted change is larger: `Web 62%, App 38% of sessions`.
    ///
    /// Uses the first count metric. `None` when any platform has no volume or
    /// either single platform has no baseline.
    pub fn platform_driver(&self) -> Option<String> {
        let metric = self.metrics.iter().find(|m| m.kind == MetricKind::Count)?;
        let app = metric.sample(Platform::App)?;
        let web = metric.sample(Platform::Web)?;
        let combined = metric.sample(Platform::Combined)?;
        if app.current == 0.0 || web.current == 0.0 || combined.current == 0.0 {
            return None;
        }

        let app_share = app.current / combined.current * 100.0;
        let web_share = web.current / combined.current * 100.0;
        let app_impact = app.yoy_change?.abs() * app_share / 100.0;
        let web_impact = web.yoy_change?.abs() * web_share / 100.0;

        let line = if web_impact > app_impact {
            format!("Web {:.0}%, App {:.0}% of {}", web_share, app_share, metric.name)
        } else {
            format!("App {:.0}%, Web {:.0}% of {}", app_share, web_share, metric.name)
        };
        Some(line)
    }

    pub fn executive_summary(&self) -> String {
        let mut text = format!(
            "Week {} Analysis ({}):\n\n",
            self.period.iso_week,
            self.period.label()
        );
        match self.headline() {
            Some(headline) => text.push_str(&headline),
            None => text.push_str("No year-over-year baseline available."),
        }

        let details: Vec<String> = [Platform::Web, Platform::App]
            .iter()
            .filter_map(|platform| {
                let phrases: Vec<String> = self
                    .metrics
                    .iter()
                    .filter_map(|m| m.yoy_phrase(*platform))
                    .collect();
                (!phrases.is_empty()).then(|| format!("{}: {}", platform, phrases.join(", ")))
            })
            .collect();

        if let Some(driver) = self.platform_driver() {
            text.push_str("\n\nPlatform Analysis:\n");
            text.push_str(&driver);
        } else if !details.is_empty() {
            text.push_str("\n\nPlatform Analysis:");
        }
        for line in details {
            text.push('\n');
            text.push_str(&line);
        }
        text
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

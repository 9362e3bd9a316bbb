use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::compare::{percent_of, round1};
use crate::config::{Settings, SideLabels, Thresholds};
use crate::report::format_count;
use crate::taxonomy::{Normalized, UnmappedSource};
use crate::week::WeekPeriod;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_a: f64,
    pub total_b: f64,
    pub difference: f64,
    pub difference_percent: f64,
}

impl Summary {
    /// Unrounded `difference` as a percentage of `total_a`.
    pub fn relative_gap(&self) -> f64 {
        percent_of(self.difference, self.total_a)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelComparison {
    pub a: f64,
    pub b: f64,
    pub difference: f64,
    pub difference_percent: f64,
}

impl ChannelComparison {
    fn new(a: f64, b: f64) -> Self {
        let difference = b - a;
        Self {
            a,
            b,
            difference,
            difference_percent: round1(percent_of(difference, a)),
        }
    }

    /// Unrounded `difference` as a percentage of `a`. Thresholds compare
    /// this; `difference_percent` is for display.
    pub fn relative_gap(&self) -> f64 {
        percent_of(self.difference, self.a)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnmappedSummary {
    /// A-side identifiers collected in the `Unmapped` bucket.
    pub a_only: Vec<UnmappedSource>,
    /// B-side channels the mapping table does not know.
    pub b_only: Vec<UnmappedSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub period: WeekPeriod,
    pub sides: SideLabels,
    pub summary: Summary,
    pub by_channel: BTreeMap<String, ChannelComparison>,
    pub unmapped: UnmappedSummary,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ReconciliationReport {
    /// Channels by B-side volume, largest first.
    pub fn channels_by_b_volume(&self) -> Vec<(&str, &ChannelComparison)> {
        let mut rows: Vec<(&str, &ChannelComparison)> = self
            .by_channel
            .iter()
            .map(|(name, data)| (name.as_str(), data))
            .collect();
        rows.sort_by(|x, y| y.1.b.total_cmp(&x.1.b).then_with(|| x.0.cmp(y.0)));
        rows
    }
}

/// Insight and recommendation rules for one reporting setup.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    thresholds: Thresholds,
    sides: SideLabels,
}

impl Reconciler {
    pub fn new(thresholds: Thresholds, sides: SideLabels) -> Self {
        Self { thresholds, sides }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.thresholds.clone(), settings.sides.clone())
    }

    pub fn reconcile(&self, a: &Normalized, b: &Normalized, period: &WeekPeriod) -> ReconciliationReport {
        if a.channels.is_empty() {
            warn!(side = %self.sides.a_name, "No totals for side A, treating as zero");
        }
        if b.channels.is_empty() {
            warn!(side = %self.sides.b_name, "No totals for side B, treating as zero");
        }

        let total_a = a.total();
        let total_b = b.total();
        let difference = total_b - total_a;
        let summary = Summary {
            total_a,
            total_b,
            difference,
            difference_percent: round1(percent_of(difference, total_a)),
        };

        let keys: BTreeSet<&String> = a.channels.keys().chain(b.channels.keys()).collect();
        let by_channel: BTreeMap<String, ChannelComparison> = keys
            .into_iter()
            .filter_map(|channel| {
                let (va, vb) = (a.get(channel), b.get(channel));
                (va != 0.0 || vb != 0.0).then(|| (channel.clone(), ChannelComparison::new(va, vb)))
            })
            .collect();

        let mut report = ReconciliationReport {
            period: *period,
            sides: self.sides.clone(),
            summary,
            by_channel,
            unmapped: UnmappedSummary {
                a_only: a.needs_mapping.clone(),
                b_only: b.needs_mapping.clone(),
            },
            insights: Vec::new(),
            recommendations: Vec::new(),
        };
        report.insights = self.insights(&report);
        report.recommendations = self.recommendations(&report);

        info!(
            period = %period.label(),
            total_a,
            total_b,
            channels = report.by_channel.len(),
            "Reconciled acquisition totals"
        );
        report
    }

    /// Channels whose gap is large in both absolute and relative terms,
    /// largest absolute gap first.
    pub fn major_discrepancies<'r>(&self, report: &'r ReconciliationReport) -> Vec<(&'r str, &'r ChannelComparison)> {
        let t = &self.thresholds;
        let mut major: Vec<(&str, &ChannelComparison)> = report
            .by_channel
            .iter()
            .filter(|(_, d)| {
                d.a.max(d.b) > t.significance_floor
                    && d.difference.abs() > t.min_abs_difference
                    && d.relative_gap().abs() > t.min_relative_percent
            })
            .map(|(name, d)| (name.as_str(), d))
            .collect();
        major.sort_by(|x, y| {
            y.1.difference
                .abs()
                .total_cmp(&x.1.difference.abs())
                .then_with(|| x.0.cmp(y.0))
        });
        major
    }

    fn insights(&self, report: &ReconciliationReport) -> Vec<String> {
        let t = &self.thresholds;
        let s = &self.sides;
        let summary = &report.summary;
        let mut insights = Vec::new();

        if summary.relative_gap().abs() <= t.alignment_percent {
            insights.push(format!(
                "Overall totals are well-aligned between {} and {} (within {}%)",
                s.b_name, s.a_name, t.alignment_percent
            ));
        } else {
            let direction = if summary.difference > 0.0 { "more" } else { "fewer" };
            insights.push(format!(
                "{} reports {} {} {} than {} ({:+.1}%)",
                s.b_name,
                format_count(summary.difference.abs()),
                direction,
                s.b_unit,
                s.a_name,
                summary.difference_percent
            ));
        }

        for (channel, data) in self
            .major_discrepancies(report)
            .into_iter()
            .take(t.max_channel_insights)
        {
            let direction = if data.difference > 0.0 {
                "overreporting"
            } else {
                "underreporting"
            };
            insights.push(format!(
                "{}: {} is {} by {} {} ({:+.1}%)",
                channel,
                s.b_name,
                direction,
                format_count(data.difference.abs()),
                s.b_unit,
                data.difference_percent
            ));
        }

        if !report.unmapped.a_only.is_empty() {
            let volume: f64 = report.unmapped.a_only.iter().map(|u| u.volume).sum();
            insights.push(format!(
                "{} {} {} from unmapped sources",
                format_count(volume),
                s.a_name,
                s.a_unit
            ));
        }

        insights
    }

    /// Independent checks, emitted in definition order.
    fn recommendations(&self, report: &ReconciliationReport) -> Vec<String> {
        let t = &self.thresholds;
        let s = &self.sides;
        let summary = &report.summary;
        let mut recommendations = Vec::new();

        if summary.total_a > summary.total_b * (1.0 + t.missing_instrumentation_percent / 100.0) {
            recommendations.push(format!(
                "{} may be missing some {}. Check that the {} SDK is properly implemented and firing on all app opens",
                s.b_name, s.a_unit, s.b_name
            ));
        }

        if let Some(direct) = report.by_channel.get(&t.direct_channel) {
            if direct.b > direct.a * (1.0 + t.direct_gap_percent / 100.0) {
                recommendations.push(format!(
                    "High {} traffic in {} ({}) vs {} ({}). Consider implementing better campaign tracking parameters",
                    t.direct_channel,
                    s.b_name,
                    format_count(direct.b),
                    s.a_name,
                    format_count(direct.a)
                ));
            }
        }

        if let Some(paid) = report.by_channel.get(&t.paid_search_channel) {
            if paid.relative_gap().abs() > t.paid_search_percent {
                recommendations.push(format!(
                    "Large discrepancy in {} attribution ({:+.1}%). Verify that all campaigns have proper {} tracking links",
                    t.paid_search_channel, paid.difference_percent, s.a_name
                ));
            }
        }

        if !report.unmapped.a_only.is_empty() {
            let listed: Vec<&str> = report
                .unmapped
                .a_only
                .iter()
                .take(t.max_unmapped_listed)
                .map(|u| u.source.as_str())
                .collect();
            recommendations.push(format!(
                "Map these {} sources to canonical channels: {}",
                s.a_name,
                listed.join(", ")
            ));
        }

        recommendations
    }
}

/// Reconcile with the default thresholds and source labels.
pub fn reconcile(a: &Normalized, b: &Normalized, period: &WeekPeriod) -> ReconciliationReport {
    Reconciler::default().reconcile(a, b, period)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::{normalize, UNMAPPED};

    fn week() -> WeekPeriod {
        WeekPeriod::from_iso(2025, 29).unwrap()
    }

    fn side(pairs: &[(&str, f64)]) -> Normalized {
        Normalized::from_channels(pairs.iter().map(|(k, v)| (k.to_string(), *v)))
    }

    #[test]
    fn summary_uses_b_minus_a() {
        let a = side(&[("Direct", 1000.0), ("Paid Search", 500.0)]);
        let b = side(&[("Direct", 700.0), ("Paid Search", 600.0)]);
        let report = reconcile(&a, &b, &week());

        assert_eq!(
            report.summary,
            Summary {
                total_a: 1500.0,
                total_b: 1300.0,
                difference: -200.0,
                difference_percent: -13.3,
            }
        );
        for data in report.by_channel.values() {
            assert_eq!(data.difference, data.b - data.a);
        }
        assert_eq!(report.by_channel["Paid Search"].difference_percent, 20.0);
    }

    #[test]
    fn boundary_gaps_do_not_fire() {
        let a = side(&[("Direct", 1000.0), ("Paid Search", 500.0)]);
        let b = side(&[("Direct", 700.0), ("Paid Search", 600.0)]);
        let report = reconcile(&a, &b, &week());

        assert_eq!(
            report.insights[0],
            "GA4 reports 200 fewer new users than AppsFlyer (-13.3%)"
        );
        assert_eq!(
            report.insights[1],
            "Direct: GA4 is underreporting by 300 new users (-30.0%)"
        );
        assert!(!report.insights.iter().any(|i| i.starts_with("Paid Search")));
        assert!(!report.recommendations.iter().any(|r| r.contains("Paid Search")));
        assert!(report.recommendations[0].starts_with("GA4 may be missing some installs"));
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn thresholds_compare_unrounded_gaps() {
        // 20.04% displays as +20.0% but is above the 20% floor.
        let report = reconcile(&side(&[("Email", 5000.0)]), &side(&[("Email", 6002.0)]), &week());
        assert_eq!(report.by_channel["Email"].difference_percent, 20.0);
        assert_eq!(
            report.insights[1],
            "Email: GA4 is overreporting by 1,002 new users (+20.0%)"
        );

        // 5.04% is outside the 5% alignment band.
        let report = reconcile(&side(&[("Direct", 10000.0)]), &side(&[("Direct", 10504.0)]), &week());
        assert_eq!(
            report.insights[0],
            "GA4 reports 504 more new users than AppsFlyer (+5.0%)"
        );

        let report = reconcile(
            &side(&[("Paid Search", 10000.0)]),
            &side(&[("Paid Search", 13004.0)]),
            &week(),
        );
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.starts_with("Large discrepancy in Paid Search attribution (+30.0%)")));
    }

    #[test]
    fn exact_alignment_boundary_counts_as_aligned() {
        let report = reconcile(&side(&[("Direct", 10000.0)]), &side(&[("Direct", 10500.0)]), &week());
        assert_eq!(report.summary.difference_percent, 5.0);
        assert_eq!(
            report.insights[0],
            "Overall totals are well-aligned between GA4 and AppsFlyer (within 5%)"
        );
    }

    #[test]
    fn channels_are_the_union_of_both_sides() {
        let a = side(&[("Direct", 100.0), ("Email", 40.0)]);
        let b = side(&[("Direct", 90.0), ("Organic Social", 25.0)]);
        let report = reconcile(&a, &b, &week());

        assert_eq!(report.by_channel.len(), 3);
        assert_eq!(report.by_channel["Email"].b, 0.0);
        assert_eq!(report.by_channel["Organic Social"].a, 0.0);
        assert_eq!(report.by_channel["Organic Social"].difference_percent, 0.0);
    }

    #[test]
    fn all_zero_channels_are_dropped() {
        let a = side(&[("Direct", 0.0), ("Email", 10.0)]);
        let b = side(&[("Direct", 0.0)]);
        let report = reconcile(&a, &b, &week());
        assert!(!report.by_channel.contains_key("Direct"));
        assert!(report.by_channel.values().all(|d| d.a != 0.0 || d.b != 0.0));
    }

    #[test]
    fn missing_b_side_is_a_full_negative_gap() {
        let a = side(&[("Direct", 800.0), ("Paid Search", 400.0)]);
        let report = reconcile(&a, &Normalized::default(), &week());

        assert_eq!(report.summary.difference, -1200.0);
        assert_eq!(report.summary.difference_percent, -100.0);
        assert_eq!(report.by_channel["Direct"].b, 0.0);
        assert!(report.recommendations.iter().any(|r| r.contains("Paid Search")));
    }

    #[test]
    fn missing_a_side_keeps_percentages_finite() {
        let b = side(&[("Direct", 300.0)]);
        let report = reconcile(&Normalized::default(), &b, &week());
        assert_eq!(report.summary.difference, 300.0);
        assert_eq!(report.summary.difference_percent, 0.0);
        assert!(report.insights[0].starts_with("Overall totals are well-aligned"));
        // Direct gap check still sees B far above A.
        assert!(report.recommendations.iter().any(|r| r.starts_with("High Direct traffic")));
    }

    #[test]
    fn top_three_discrepancies_by_absolute_gap() {
        let a = side(&[
            ("Direct", 1000.0),
            ("Email", 2000.0),
            ("Referral", 600.0),
            ("Display", 400.0),
            ("Affiliates", 300.0),
        ]);
        let b = side(&[
            ("Direct", 1500.0),
            ("Email", 1000.0),
            ("Referral", 300.0),
            ("Display", 200.0),
            ("Affiliates", 310.0),
        ]);
        let reconciler = Reconciler::default();
        let report = reconciler.reconcile(&a, &b, &week());

        let major: Vec<&str> = reconciler
            .major_discrepancies(&report)
            .into_iter()
            .map(|(c, _)| c)
            .collect();
        assert_eq!(major, vec!["Email", "Direct", "Referral", "Display"]);

        let channel_insights: Vec<&String> = report.insights.iter().skip(1).collect();
        assert_eq!(channel_insights.len(), 3);
        assert!(channel_insights[0].starts_with("Email: GA4 is underreporting by 1,000"));
        assert!(channel_insights[1].starts_with("Direct: GA4 is overreporting by 500"));
    }

    #[test]
    fn unmapped_sources_surface_in_insights_and_recommendations() {
        let mapping = Settings::default().channel_mapping().unwrap();
        let a = normalize(
            vec![
                ("organic", 500.0),
                ("tiktok_int", 120.0),
                ("snapchat_int", 80.0),
                ("reddit_int", 40.0),
                ("pinterest_int", 10.0),
            ],
            &mapping,
        );
        let b = side(&[("Direct", 510.0), (UNMAPPED, 0.0)]);
        let report = reconcile(&a, &b, &week());

        assert_eq!(report.by_channel[UNMAPPED].a, 250.0);
        assert_eq!(report.insights.last().unwrap(), "250 AppsFlyer installs from unmapped sources");
        assert_eq!(
            report.recommendations.last().unwrap(),
            "Map these AppsFlyer sources to canonical channels: tiktok_int, snapchat_int, reddit_int"
        );
    }

    #[test]
    fn recommendations_follow_definition_order() {
        let mapping = Settings::default().channel_mapping().unwrap();
        let a = normalize(
            vec![("organic", 100.0), ("googleadwords_int", 1000.0), ("mystery", 60.0)],
            &mapping,
        );
        let b = side(&[("Direct", 400.0), ("Paid Search", 200.0)]);
        let report = reconcile(&a, &b, &week());

        let order: Vec<&str> = report
            .recommendations
            .iter()
            .map(|r| r.split_whitespace().next().unwrap_or(""))
            .collect();
        assert_eq!(order, vec!["GA4", "High", "Large", "Map"]);
    }

    #[test]
    fn custom_labels_and_thresholds_apply() {
        let mut thresholds = Thresholds::default();
        thresholds.alignment_percent = 20.0;
        let sides = SideLabels {
            a_name: "Adjust".to_string(),
            a_unit: "installs".to_string(),
            b_name: "Firebase".to_string(),
            b_unit: "first opens".to_string(),
        };
        let a = side(&[("Direct", 1000.0)]);
        let b = side(&[("Direct", 900.0)]);
        let report = Reconciler::new(thresholds, sides).reconcile(&a, &b, &week());
        assert_eq!(
            report.insights[0],
            "Overall totals are well-aligned between Firebase and Adjust (within 20%)"
        );
    }

    #[test]
    fn rows_sort_by_b_volume() {
        let a = side(&[("Direct", 10.0), ("Email", 500.0), ("Display", 5.0)]);
        let b = side(&[("Direct", 300.0), ("Email", 20.0), ("Display", 300.0)]);
        let report = reconcile(&a, &b, &week());
        let order: Vec<&str> = report.channels_by_b_volume().into_iter().map(|(c, _)| c).collect();
        assert_eq!(order, vec!["Direct", "Display", "Email"]);
    }
}

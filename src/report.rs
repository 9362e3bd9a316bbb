use std::fmt::Write;

use serde::Serialize;

use crate::compare::SourceChange;
use crate::engagement::EngagementReport;
use crate::error::Result;
use crate::models::MetricKind;
use crate::reconcile::ReconciliationReport;
use crate::sources::SourceTotals;
use crate::week::WeekPeriod;

/// `1234.0` as `1,234`; one decimal is kept when present.
pub fn format_count(value: f64) -> String {
    let rounded = (value * 10.0).round() / 10.0;
    let abs = rounded.abs();
    let whole = abs.trunc() as u64;
    let tenths = ((abs - abs.trunc()) * 10.0).round() as u64;

    let digits = whole.to_string();
    let mut out = String::new();
    if rounded < 0.0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if tenths > 0 {
        let _ = write!(out, ".{tenths}");
    }
    out
}

/// Count with an explicit sign: `+1,234`, `-200`, `+0`.
pub fn format_signed(value: f64) -> String {
    let formatted = format_count(value);
    if formatted.starts_with('-') {
        formatted
    } else {
        format!("+{formatted}")
    }
}

pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn render_reconciliation(report: &ReconciliationReport) -> String {
    let sides = &report.sides;
    let summary = &report.summary;
    let mut output = String::new();

    let _ = writeln!(output, "## User Acquisition Reconciliation Report");
    let _ = writeln!(
        output,
        "**Period:** {} (Week {}, {})",
        report.period.label(),
        report.period.iso_week,
        report.period.iso_year
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "### Summary");
    let _ = writeln!(
        output,
        "- **{} {}:** {}",
        sides.a_name,
        title_case(&sides.a_unit),
        format_count(summary.total_a)
    );
    let _ = writeln!(
        output,
        "- **{} {}:** {}",
        sides.b_name,
        title_case(&sides.b_unit),
        format_count(summary.total_b)
    );
    let _ = writeln!(
        output,
        "- **Difference:** {} ({:+.1}%)",
        format_signed(summary.difference),
        summary.difference_percent
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "### Channel Comparison");
    if report.by_channel.is_empty() {
        let _ = writeln!(output, "No channel volume reported by either source.");
    } else {
        let _ = writeln!(
            output,
            "| Channel | {} | {} | Difference | % Diff |",
            sides.a_name, sides.b_name
        );
        let _ = writeln!(output, "|---------|------|------|------------|--------|");
        for (channel, data) in report.channels_by_b_volume() {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {:+.1}% |",
                channel,
                format_count(data.a),
                format_count(data.b),
                format_signed(data.difference),
                data.difference_percent
            );
        }
    }

    if !report.insights.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "### Key Insights");
        for insight in &report.insights {
            let _ = writeln!(output, "- {insight}");
        }
    }

    if !report.recommendations.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "### Recommendations");
        for recommendation in &report.recommendations {
            let _ = writeln!(output, "- {recommendation}");
        }
    }

    if !report.unmapped.a_only.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "### Unmapped {} Sources", sides.a_name);
        for source in report.unmapped.a_only.iter().take(5) {
            let _ = writeln!(
                output,
                "- {}: {} {}",
                source.source,
                format_count(source.volume),
                sides.a_unit
            );
        }
    }

    if !report.unmapped.b_only.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "### {} Channels Without a Mapping", sides.b_name);
        for channel in report.unmapped.b_only.iter().take(5) {
            let _ = writeln!(
                output,
                "- {}: {} {}",
                channel.source,
                format_count(channel.volume),
                sides.b_unit
            );
        }
    }

    output
}

/// Year-over-year media source movement for one side's raw totals.
pub fn render_source_changes(
    title: &str,
    period: &WeekPeriod,
    current: &SourceTotals,
    previous: &SourceTotals,
    changes: &[SourceChange],
    min_campaign_volume: f64,
) -> String {
    let mut output = String::new();
    let total_change = current.total() - previous.total();
    let total_percent = crate::compare::compare(
        crate::models::Metric::Count(current.total()),
        previous.total(),
    );

    let _ = writeln!(output, "## {title}");
    let _ = writeln!(
        output,
        "**Analysis Period:** Week {} ({} vs {})",
        period.iso_week,
        period.iso_year,
        period.year_over_year().iso_year
    );
    let _ = writeln!(
        output,
        "**Total:** {} vs {} ({}, {})",
        format_count(current.total()),
        format_count(previous.total()),
        format_signed(total_change),
        format_delta(total_percent, MetricKind::Count)
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "### Media Source Performance");
    let shown: Vec<&SourceChange> = changes
        .iter()
        .filter(|c| c.current > 0.0 || c.previous > 0.0)
        .take(5)
        .collect();
    if shown.is_empty() {
        let _ = writeln!(output, "No source volume in either period.");
    }
    for change in shown {
        let _ = writeln!(
            output,
            "- **{}:** {} vs {} ({}, {})",
            change.source,
            format_count(change.current),
            format_count(change.previous),
            format_signed(change.change),
            format_delta(change.percent_change, MetricKind::Count)
        );
    }

    let campaigns = current.significant_campaigns(min_campaign_volume);
    if !campaigns.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "### Campaign Performance ({}+)",
            format_count(min_campaign_volume)
        );
        for (campaign, volume) in campaigns.iter().take(3) {
            let before = previous.campaigns.get(*campaign).copied().unwrap_or(0.0);
            let _ = writeln!(
                output,
                "- **{}:** {} vs {} ({})",
                campaign,
                format_count(*volume),
                format_count(before),
                format_signed(volume - before)
            );
        }
    }

    output
}

pub fn render_engagement(report: &EngagementReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "## Weekly Engagement Report");
    let _ = writeln!(output, "**Period:** {}", report.period);
    let _ = writeln!(output);
    let _ = writeln!(output, "{}", report.executive_summary());

    for metric in &report.metrics {
        let _ = writeln!(output);
        let _ = writeln!(output, "### {}", title_case(&metric.name));
        let _ = writeln!(output, "| Platform | Current | Previous | YoY |");
        let _ = writeln!(output, "|----------|---------|----------|-----|");
        for sample in &metric.samples {
            let previous = sample
                .previous
                .map(|p| metric.display_value(p))
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} |",
                sample.platform,
                metric.display_value(sample.current),
                previous,
                format_delta(sample.yoy_change, sample.kind)
            );
        }
    }

    output
}

/// `+5.2%`, `-0.4 ppts`, or `n/a` when there was no baseline.
pub fn format_delta(delta: Option<f64>, kind: MetricKind) -> String {
    match delta {
        Some(value) => format!("{:+.1}{}", value, kind.delta_unit()),
        None => "n/a".to_string(),
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

use std::io::Write;

use weekly_reconcile::config::Settings;
use weekly_reconcile::extract::extract;
use weekly_reconcile::reconcile::Reconciler;
use weekly_reconcile::report::render_reconciliation;
use weekly_reconcile::sources::{load_totals_csv, TotalsColumns};
use weekly_reconcile::taxonomy::{normalize, normalize_channels, Normalized};
use weekly_reconcile::{Platform, WeekPeriod};

const APP_SESSIONS: &str = "\"Sessions\"\n\
    \"Daily average\"\n\
    \"Segment\",\"2025-07-07T00:00:00\",\"2025-07-14T00:00:00\"\n\
    \"Apps Only\",\"1,100\",\"1,234\"\n";

#[test]
fn reads_the_target_week_from_a_chart_export() {
    let settings = Settings::default();
    let week = WeekPeriod::from_iso(2025, 29).unwrap();
    let values = extract(APP_SESSIONS, &week, &settings.platform_matchers());

    assert_eq!(values[&Platform::App], 1234.0);
    assert_eq!(values[&Platform::Web], 0.0);
    assert_eq!(values[&Platform::Combined], 0.0);
}

#[test]
fn reconciles_channel_totals_and_renders() {
    let week = WeekPeriod::from_iso(2025, 29).unwrap();
    let a = Normalized::from_channels(vec![("Direct", 1000.0), ("Paid Search", 500.0)]);
    let b = Normalized::from_channels(vec![("Direct", 700.0), ("Paid Search", 600.0)]);

    let report = Reconciler::default().reconcile(&a, &b, &week);
    assert_eq!(report.summary.total_a, 1500.0);
    assert_eq!(report.summary.total_b, 1300.0);
    assert_eq!(report.summary.difference, -200.0);
    assert_eq!(report.summary.difference_percent, -13.3);
    assert_eq!(report.by_channel["Direct"].difference_percent, -30.0);
    assert_eq!(report.by_channel["Paid Search"].difference_percent, 20.0);

    let text = render_reconciliation(&report);
    assert!(text.contains("| Direct | 1,000 | 700 | -300 | -30.0% |"));
    assert!(text.contains("- **Difference:** -200 (-13.3%)"));
}

#[test]
fn csv_exports_flow_through_a_configured_mapping() {
    let dir = tempfile::tempdir().unwrap();

    let config_path = dir.path().join("settings.toml");
    let mut config = std::fs::File::create(&config_path).unwrap();
    writeln!(
        config,
        r#"
[[channels]]
name = "Search"
sources = ["googleadwords_int", "bing_int"]

[[channels]]
name = "Direct"
sources = ["organic"]

[sides]
a_name = "Adjust"
"#
    )
    .unwrap();

    let export_path = dir.path().join("installs.csv");
    std::fs::write(
        &export_path,
        "media-source,installs appsflyer\n\
         organic,300\n\
         googleadwords_int,150\n\
         bing_int,50\n\
         tiktok_int,20\n\
         facebook,0\n",
    )
    .unwrap();

    let settings = Settings::load(&config_path).unwrap();
    let mapping = settings.channel_mapping().unwrap();
    let totals = load_totals_csv(
        &export_path,
        TotalsColumns {
            source: &settings.columns.a_source,
            count: &settings.columns.a_count,
            campaign: None,
        },
    )
    .unwrap();
    assert_eq!(totals.skipped, 1);

    let a = normalize(totals.totals, &mapping);
    assert_eq!(a.get("Search"), 200.0);
    assert_eq!(a.unmapped_ids(), vec!["tiktok_int"]);

    let b = Normalized::from_channels(vec![("Direct", 290.0), ("Search", 210.0)]);
    let week = WeekPeriod::from_iso(2025, 29).unwrap();
    let report = Reconciler::from_settings(&settings).reconcile(&a, &b, &week);

    assert_eq!(report.summary.total_a, 520.0);
    assert_eq!(report.unmapped.a_only.len(), 1);
    assert!(report
        .insights
        .iter()
        .any(|i| i == "20 Adjust installs from unmapped sources"));
}

#[test]
fn empty_b_export_reconciles_against_zero() {
    let dir = tempfile::tempdir().unwrap();
    let b_path = dir.path().join("new_users.csv");
    std::fs::write(&b_path, "").unwrap();

    let settings = Settings::default();
    let mapping = settings.channel_mapping().unwrap();
    let b_totals = load_totals_csv(
        &b_path,
        TotalsColumns {
            source: &settings.columns.b_source,
            count: &settings.columns.b_count,
            campaign: None,
        },
    )
    .unwrap();
    let b = normalize_channels(b_totals.totals, &mapping);

    let a = Normalized::from_channels(vec![("Direct", 400.0), ("Paid Search", 100.0)]);
    let week = WeekPeriod::from_iso(2025, 29).unwrap();
    let report = Reconciler::from_settings(&settings).reconcile(&a, &b, &week);

    assert_eq!(report.summary.total_b, 0.0);
    assert_eq!(report.summary.difference, -500.0);
    assert_eq!(report.summary.difference_percent, -100.0);
    assert_eq!(report.by_channel["Direct"].b, 0.0);
}

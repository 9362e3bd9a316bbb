use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weekly_reconcile::compare::compare_sources;
use weekly_reconcile::engagement::{
    compare_metric, compare_paired_metric, EngagementReport, MetricDefinition,
};
use weekly_reconcile::extract::{extract_detailed, PREVIOUS_ROW_MARKER};
use weekly_reconcile::reconcile::Reconciler;
use weekly_reconcile::report;
use weekly_reconcile::sources::{load_totals_csv, parse_totals_json, SourceTotals, TotalsColumns};
use weekly_reconcile::taxonomy::{normalize, normalize_channels, Normalized};
use weekly_reconcile::{MetricKind, Settings, WeekPeriod};

#[derive(Parser)]
#[command(name = "weekly-reconcile")]
#[command(about = "Weekly acquisition reconciliation and engagement YoY reports", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML); falls back to WEEKLY_RECONCILE_CONFIG, then defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read per-platform values for one week from a chart payload
    Extract {
        #[arg(long)]
        payload: PathBuf,
        #[command(flatten)]
        week: WeekArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Compare one metric against the same week a year earlier
    Yoy {
        #[arg(long)]
        name: String,
        #[arg(long, value_enum, default_value_t = KindArg::Count)]
        kind: KindArg,
        /// Cells are written as percentages (`3.1%`)
        #[arg(long)]
        percent: bool,
        #[arg(long)]
        current: PathBuf,
        /// Prior-year payload; omit when the current chart has `[Previous]` rows
        #[arg(long)]
        previous: Option<PathBuf>,
        #[command(flatten)]
        week: WeekArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Reconcile attribution installs against analytics new users by channel
    Reconcile {
        /// Per-source export from the attribution side (CSV or JSON)
        #[arg(long)]
        a: PathBuf,
        /// Per-channel export from the analytics side (CSV or JSON)
        #[arg(long)]
        b: PathBuf,
        #[command(flatten)]
        week: WeekArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Year-over-year movement per media source
    Sources {
        #[arg(long)]
        current: PathBuf,
        #[arg(long)]
        previous: PathBuf,
        #[command(flatten)]
        week: WeekArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Engagement summary over the metrics listed in a manifest
    Summary {
        #[arg(long)]
        manifest: PathBuf,
        #[command(flatten)]
        week: WeekArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args)]
struct WeekArgs {
    /// ISO year; defaults to the last completed week
    #[arg(long, requires = "week")]
    year: Option<i32>,
    /// ISO week number
    #[arg(long, requires = "year")]
    week: Option<u32>,
}

impl WeekArgs {
    fn resolve(&self) -> anyhow::Result<WeekPeriod> {
        match (self.year, self.week) {
            (Some(year), Some(week)) => Ok(WeekPeriod::from_iso(year, week)?),
            _ => Ok(WeekPeriod::last_completed(Utc::now().date_naive())),
        }
    }
}

#[derive(Args)]
struct OutputArgs {
    #[arg(long, value_enum, default_value_t = Format::Markdown)]
    format: Format,
    /// Write to this file instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Count,
    Rate,
}

impl From<KindArg> for MetricKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Count => MetricKind::Count,
            KindArg::Rate => MetricKind::Rate,
        }
    }
}

/// Metrics for the `summary` command. Payload paths are relative to the
/// manifest file.
#[derive(Deserialize)]
struct Manifest {
    metrics: Vec<ManifestMetric>,
}

#[derive(Deserialize)]
struct ManifestMetric {
    #[serde(flatten)]
    definition: MetricDefinition,
    current: PathBuf,
    previous: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::resolve(cli.config.as_deref()).context("failed to load settings")?;

    match cli.command {
        Commands::Extract {
            payload,
            week,
            output,
        } => {
            let week = week.resolve()?;
            let text = read_text(&payload)?;
            let extraction = extract_detailed(&text, &week, &settings.platform_matchers());
            let rendered = match output.format {
                Format::Json => report::to_json(&extraction)?,
                Format::Markdown => {
                    let mut lines = vec![format!("## {week}")];
                    for (platform, value) in &extraction.values {
                        lines.push(format!("- **{platform}:** {}", report::format_count(*value)));
                    }
                    lines.join("\n") + "\n"
                }
            };
            emit(&rendered, output.out.as_deref())?;
        }
        Commands::Yoy {
            name,
            kind,
            percent,
            current,
            previous,
            week,
            output,
        } => {
            let week = week.resolve()?;
            let definition = MetricDefinition {
                name,
                kind: kind.into(),
                percent_formatted: percent,
            };
            let metric = compare_payloads(&settings, &definition, &current, previous.as_deref(), &week)?;
            let engagement = EngagementReport::new(week, vec![metric]);
            let rendered = match output.format {
                Format::Json => report::to_json(&engagement)?,
                Format::Markdown => report::render_engagement(&engagement),
            };
            emit(&rendered, output.out.as_deref())?;
        }
        Commands::Reconcile { a, b, week, output } => {
            let week = week.resolve()?;
            let mapping = settings.channel_mapping().context("invalid channel mapping")?;
            let columns = &settings.columns;

            let a_totals = load_side(
                &a,
                TotalsColumns {
                    source: &columns.a_source,
                    count: &columns.a_count,
                    campaign: None,
                },
            )?;
            let a_side = normalize(a_totals, &mapping);

            let b_side = if b.exists() {
                let b_totals = load_side(
                    &b,
                    TotalsColumns {
                        source: &columns.b_source,
                        count: &columns.b_count,
                        campaign: None,
                    },
                )?;
                normalize_channels(b_totals, &mapping)
            } else {
                warn!(path = %b.display(), "Side B export missing, reconciling against zero");
                Normalized::default()
            };

            let reconciliation = Reconciler::from_settings(&settings).reconcile(&a_side, &b_side, &week);
            let rendered = match output.format {
                Format::Json => report::to_json(&reconciliation)?,
                Format::Markdown => report::render_reconciliation(&reconciliation),
            };
            emit(&rendered, output.out.as_deref())?;
        }
        Commands::Sources {
            current,
            previous,
            week,
            output,
        } => {
            let week = week.resolve()?;
            let columns = TotalsColumns {
                source: &settings.columns.a_source,
                count: &settings.columns.a_count,
                campaign: Some(&settings.columns.a_campaign),
            };
            let current_totals = load_totals_csv(&current, columns)
                .with_context(|| format!("failed to read {}", current.display()))?;
            let previous_totals = load_totals_csv(&previous, columns)
                .with_context(|| format!("failed to read {}", previous.display()))?;
            let changes = compare_sources(&current_totals.totals, &previous_totals.totals);

            let rendered = match output.format {
                Format::Json => report::to_json(&changes)?,
                Format::Markdown => report::render_source_changes(
                    &format!("{} Weekly Performance", settings.sides.a_name),
                    &week,
                    &current_totals,
                    &previous_totals,
                    &changes,
                    settings.thresholds.min_campaign_volume,
                ),
            };
            emit(&rendered, output.out.as_deref())?;
        }
        Commands::Summary {
            manifest,
            week,
            output,
        } => {
            let week = week.resolve()?;
            let content = read_text(&manifest)?;
            let parsed: Manifest = toml::from_str(&content)
                .with_context(|| format!("invalid manifest {}", manifest.display()))?;
            if parsed.metrics.is_empty() {
                bail!("manifest {} lists no metrics", manifest.display());
            }
            let base = manifest.parent().unwrap_or_else(|| Path::new("."));

            let mut metrics = Vec::with_capacity(parsed.metrics.len());
            for entry in &parsed.metrics {
                let current = base.join(&entry.current);
                let previous = entry.previous.as_ref().map(|p| base.join(p));
                metrics.push(compare_payloads(
                    &settings,
                    &entry.definition,
                    &current,
                    previous.as_deref(),
                    &week,
                )?);
            }

            let engagement = EngagementReport::new(week, metrics);
            let rendered = match output.format {
                Format::Json => report::to_json(&engagement)?,
                Format::Markdown => report::render_engagement(&engagement),
            };
            emit(&rendered, output.out.as_deref())?;
        }
    }

    Ok(())
}

fn compare_payloads(
    settings: &Settings,
    definition: &MetricDefinition,
    current: &Path,
    previous: Option<&Path>,
    week: &WeekPeriod,
) -> anyhow::Result<weekly_reconcile::engagement::MetricComparison> {
    let matchers = settings.platform_matchers();
    let current_text = read_text(current)?;
    let metric = match previous {
        Some(previous) => {
            let previous_text = read_text(previous)?;
            compare_metric(definition, &current_text, &previous_text, week, &matchers)
        }
        None => compare_paired_metric(definition, &current_text, &matchers, PREVIOUS_ROW_MARKER),
    };
    Ok(metric)
}

/// Per-identifier totals from a CSV export, or JSON when the file ends in `.json`.
fn load_side(path: &Path, columns: TotalsColumns<'_>) -> anyhow::Result<BTreeMap<String, f64>> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let totals = if is_json {
        parse_totals_json(&read_text(path)?)
            .with_context(|| format!("invalid totals in {}", path.display()))?
    } else {
        let SourceTotals { totals, .. } = load_totals_csv(path, columns)
            .with_context(|| format!("failed to read {}", path.display()))?;
        totals
    };
    Ok(totals)
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn emit(rendered: &str, out: Option<&Path>) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

//! Tabular metric extraction from exported chart payloads.
//!
//! A chart export is loosely CSV shaped: a few metadata lines, one header line
//! whose cells carry per-column timestamps, then one line per platform segment.
//! Extraction runs as a small state machine:
//!
//! `SeekHeader -> LocateColumn -> MatchPlatformRows -> ExtractCell -> FallbackScan -> Done`
//!
//! Each stage is also exposed as a free function so it can be exercised on its
//! own. Nothing here returns an error: a payload that cannot be read yields
//! zeros for the affected platforms only.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PlatformLabels;
use crate::models::Platform;
use crate::week::WeekPeriod;

/// Header rows carry ISO timestamps such as `2025-07-14T00:00:00`.
static TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").expect("valid regex"));

/// Metadata lines plus a header and at least one data line.
const MIN_PAYLOAD_LINES: usize = 4;

pub const PREVIOUS_ROW_MARKER: &str = "[Previous]";

/// Row-label substrings identifying each platform's data line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformMatchers {
    labels: BTreeMap<Platform, Vec<String>>,
}

impl PlatformMatchers {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = (Platform, S)>,
        S: Into<String>,
    {
        let mut matchers = Self::empty();
        for (platform, label) in labels {
            matchers.add(platform, label);
        }
        matchers
    }

    pub fn from_labels(labels: &PlatformLabels) -> Self {
        let mut matchers = Self::empty();
        for (platform, list) in [
            (Platform::App, &labels.app),
            (Platform::Web, &labels.web),
            (Platform::Combined, &labels.combined),
        ] {
            for label in list {
                matchers.add(platform, label.clone());
            }
        }
        matchers
    }

    pub fn add(&mut self, platform: Platform, label: impl Into<String>) {
        let label = label.into();
        if label.is_empty() {
            return;
        }
        self.labels.entry(platform).or_default().push(label);
    }

    pub fn matches(&self, platform: Platform, line: &str) -> bool {
        self.labels
            .get(&platform)
            .is_some_and(|labels| labels.iter().any(|l| line.contains(l.as_str())))
    }
}

/// Where a platform's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "column", rename_all = "snake_case")]
pub enum ValueSource {
    /// The column whose header matched the target week.
    Column(usize),
    /// The right-most numeric cell, used when no column was located.
    Fallback(usize),
    /// Nothing parseable; the value defaulted to zero.
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowReading {
    pub line: usize,
    pub source: ValueSource,
}

/// Extraction result with the decisions that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    /// Always holds every platform; unresolved platforms are `0.0`.
    pub values: BTreeMap<Platform, f64>,
    pub header_line: Option<usize>,
    pub column: Option<usize>,
    pub rows: BTreeMap<Platform, RowReading>,
}

impl Extraction {
    fn zeroed() -> Self {
        Self {
            values: Platform::ALL.iter().map(|p| (*p, 0.0)).collect(),
            header_line: None,
            column: None,
            rows: BTreeMap::new(),
        }
    }

    pub fn value(&self, platform: Platform) -> f64 {
        self.values.get(&platform).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    SeekHeader,
    LocateColumn { header: usize },
    MatchPlatformRows { column: Option<usize> },
    ExtractCell { column: usize },
    FallbackScan,
    Done,
}

struct Extractor<'a> {
    lines: Vec<&'a str>,
    target: &'a WeekPeriod,
    matchers: &'a PlatformMatchers,
    fallback: Vec<Platform>,
    out: Extraction,
}

impl<'a> Extractor<'a> {
    fn new(payload: &'a str, target: &'a WeekPeriod, matchers: &'a PlatformMatchers) -> Self {
        Self {
            lines: payload.trim().lines().collect(),
            target,
            matchers,
            fallback: Vec::new(),
            out: Extraction::zeroed(),
        }
    }

    fn run(mut self) -> Extraction {
        let mut stage = Stage::SeekHeader;
        while stage != Stage::Done {
            debug!(?stage, "Extraction stage");
            stage = self.step(stage);
        }
        self.out
    }

    fn step(&mut self, stage: Stage) -> Stage {
        match stage {
            Stage::SeekHeader => {
                if self.lines.len() < MIN_PAYLOAD_LINES {
                    warn!(lines = self.lines.len(), "Payload too short, returning zeros");
                    return Stage::Done;
                }
                match seek_header(&self.lines) {
                    Some(header) => {
                        self.out.header_line = Some(header);
                        Stage::LocateColumn { header }
                    }
                    None => {
                        warn!("No dated header line in payload, returning zeros");
                        Stage::Done
                    }
                }
            }
            Stage::LocateColumn { header } => {
                let cells = split_cells(self.lines[header]);
                let key = self.target.start_key();
                let column = locate_column(&cells, &key);
                match column {
                    Some(index) => debug!(index, week_start = %key, "Located target week column"),
                    None => warn!(week_start = %key, "Target week not in header, scanning rows from the right"),
                }
                self.out.column = column;
                Stage::MatchPlatformRows { column }
            }
            Stage::MatchPlatformRows { column } => {
                let rows = match_platform_rows(&self.lines, self.matchers, self.out.header_line);
                if rows.is_empty() {
                    warn!("No platform rows matched");
                    return Stage::Done;
                }
                for (platform, line) in rows {
                    self.out.rows.insert(
                        platform,
                        RowReading {
                            line,
                            source: ValueSource::Zero,
                        },
                    );
                }
                match column {
                    Some(column) => Stage::ExtractCell { column },
                    None => {
                        self.fallback = self.out.rows.keys().copied().collect();
                        Stage::FallbackScan
                    }
                }
            }
            Stage::ExtractCell { column } => {
                let platforms: Vec<Platform> = self.out.rows.keys().copied().collect();
                for platform in platforms {
                    let line = self.out.rows[&platform].line;
                    let cells = split_cells(self.lines[line]);
                    match extract_cell(&cells, column) {
                        CellOutcome::Value(value) => self.record(platform, value, ValueSource::Column(column)),
                        CellOutcome::Unparseable => {
                            warn!(%platform, column, "Unparseable cell, using zero");
                        }
                        CellOutcome::OutOfRange => self.fallback.push(platform),
                    }
                }
                if self.fallback.is_empty() {
                    Stage::Done
                } else {
                    Stage::FallbackScan
                }
            }
            Stage::FallbackScan => {
                for platform in std::mem::take(&mut self.fallback) {
                    let line = self.out.rows[&platform].line;
                    let cells = split_cells(self.lines[line]);
                    match fallback_scan(&cells) {
                        Some((index, value)) => self.record(platform, value, ValueSource::Fallback(index)),
                        None => warn!(%platform, "No numeric cell in row, using zero"),
                    }
                }
                Stage::Done
            }
            Stage::Done => Stage::Done,
        }
    }

    fn record(&mut self, platform: Platform, value: f64, source: ValueSource) {
        debug!(%platform, value, ?source, "Extracted value");
        self.out.values.insert(platform, value);
        if let Some(row) = self.out.rows.get_mut(&platform) {
            row.source = source;
        }
    }
}

/// Per-platform values for `target` week. Every platform is present.
pub fn extract(
    payload: &str,
    target: &WeekPeriod,
    matchers: &PlatformMatchers,
) -> BTreeMap<Platform, f64> {
    extract_detailed(payload, target, matchers).values
}

pub fn extract_detailed(
    payload: &str,
    target: &WeekPeriod,
    matchers: &PlatformMatchers,
) -> Extraction {
    Extractor::new(payload, target, matchers).run()
}

/// Index of the first line carrying a timestamp-like marker.
pub fn seek_header(lines: &[&str]) -> Option<usize> {
    lines.iter().position(|line| TIMESTAMP.is_match(line))
}

/// First header cell containing `week_start` (`YYYY-MM-DD`).
///
/// Containment rather than equality: header cells are full timestamps.
pub fn locate_column(header_cells: &[String], week_start: &str) -> Option<usize> {
    header_cells.iter().position(|cell| cell.contains(week_start))
}

/// Line index for each platform. Platforms are offered each line in
/// `Platform::ALL` order; a line is claimed by at most one platform and the
/// first matching line for a platform wins.
pub fn match_platform_rows(
    lines: &[&str],
    matchers: &PlatformMatchers,
    skip: Option<usize>,
) -> BTreeMap<Platform, usize> {
    let mut rows = BTreeMap::new();
    for (index, line) in lines.iter().enumerate() {
        if Some(index) == skip {
            continue;
        }
        let claimant = Platform::ALL
            .iter()
            .copied()
            .find(|p| !rows.contains_key(p) && matchers.matches(*p, line));
        if let Some(platform) = claimant {
            rows.insert(platform, index);
        }
    }
    rows
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellOutcome {
    Value(f64),
    Unparseable,
    OutOfRange,
}

/// Value at `column`. An empty cell reads as zero.
pub fn extract_cell(cells: &[String], column: usize) -> CellOutcome {
    match cells.get(column) {
        None => CellOutcome::OutOfRange,
        Some(cell) if clean_cell(cell).is_empty() => CellOutcome::Value(0.0),
        Some(cell) => parse_cell(cell).map_or(CellOutcome::Unparseable, CellOutcome::Value),
    }
}

/// Right-most numeric cell, skipping the label cell at index 0.
pub fn fallback_scan(cells: &[String]) -> Option<(usize, f64)> {
    (1..cells.len())
        .rev()
        .find_map(|i| parse_cell(&cells[i]).map(|value| (i, value)))
}

/// Numeric magnitude of a decorated cell: `"18.7%"` is `18.7`, `"1,234"` is `1234`.
pub fn parse_cell(cell: &str) -> Option<f64> {
    let cleaned = clean_cell(cell);
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn clean_cell(cell: &str) -> String {
    cell.trim()
        .trim_matches('"')
        .chars()
        .filter(|c| *c != '%' && *c != ',')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Split one line into cells, honouring quotes so `"1,234"` stays one cell.
pub fn split_cells(line: &str) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(Ok(record)) => record.iter().map(str::to_string).collect(),
        _ => line.split(',').map(str::to_string).collect(),
    }
}

/// Current and prior-period values from a chart that carries both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PairedValue {
    pub current: f64,
    pub previous: f64,
}

/// Read charts whose prior period is a second set of rows tagged with
/// `previous_marker`. A row's value is its second-to-last cell, since the last
/// column is usually the week still in progress.
///
/// Combined labels are checked before App and Web so that a label such as
/// `App + Web` is never claimed by a single platform.
pub fn extract_paired(
    payload: &str,
    matchers: &PlatformMatchers,
    previous_marker: &str,
) -> BTreeMap<Platform, PairedValue> {
    const ORDER: [Platform; 3] = [Platform::Combined, Platform::App, Platform::Web];

    let mut current: BTreeMap<Platform, &str> = BTreeMap::new();
    let mut previous: BTreeMap<Platform, &str> = BTreeMap::new();

    for line in payload.trim().lines() {
        let Some(platform) = ORDER.iter().copied().find(|p| matchers.matches(*p, line)) else {
            continue;
        };
        let slot = if line.contains(previous_marker) {
            &mut previous
        } else {
            &mut current
        };
        slot.entry(platform).or_insert(line);
    }

    Platform::ALL
        .iter()
        .map(|platform| {
            let read = |rows: &BTreeMap<Platform, &str>| {
                rows.get(platform)
                    .map(|line| trailing_value(&split_cells(line)))
                    .unwrap_or(0.0)
            };
            (
                *platform,
                PairedValue {
                    current: read(&current),
                    previous: read(&previous),
                },
            )
        })
        .collect()
}

fn trailing_value(cells: &[String]) -> f64 {
    if cells.len() >= 3 {
        if let Some(value) = parse_cell(&cells[cells.len() - 2]) {
            return value;
        }
    }
    fallback_scan(cells).map(|(_, v)| v).unwrap_or(0.0)
}

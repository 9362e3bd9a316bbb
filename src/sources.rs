use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::extract::parse_cell;

/// Identifier used when an export row has no source value.
pub const UNKNOWN_SOURCE: &str = "Unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceTotals {
    pub totals: BTreeMap<String, f64>,
    pub campaigns: BTreeMap<String, f64>,
    pub rows: usize,
    pub skipped: usize,
}

impl SourceTotals {
    pub fn total(&self) -> f64 {
        self.totals.values().sum()
    }

    /// Campaigns at or above `min_volume`, largest first.
    pub fn significant_campaigns(&self, min_volume: f64) -> Vec<(&str, f64)> {
        let mut campaigns: Vec<(&str, f64)> = self
            .campaigns
            .iter()
            .filter(|(_, v)| **v >= min_volume)
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        campaigns.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        campaigns
    }
}

/// Column names to read from a totals export.
#[derive(Debug, Clone, Copy)]
pub struct TotalsColumns<'a> {
    pub source: &'a str,
    pub count: &'a str,
    pub campaign: Option<&'a str>,
}

/// Sum counts per identifier. Rows whose count is zero or unparseable are
/// skipped. An empty export yields empty totals; a header without the
/// identifier or count column is an error.
pub fn read_totals_csv<R: Read>(reader: R, columns: TotalsColumns<'_>) -> Result<SourceTotals> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    if headers.iter().all(str::is_empty) {
        warn!("Export is empty, treating totals as zero");
        return Ok(SourceTotals::default());
    }
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::InvalidInput(format!("export has no '{name}' column")))
    };
    let source_idx = find(columns.source)?;
    let count_idx = find(columns.count)?;
    let campaign_idx = match columns.campaign {
        Some(name) => headers.iter().position(|h| h.eq_ignore_ascii_case(name)),
        None => None,
    };

    let mut out = SourceTotals::default();
    for record in reader.records() {
        let record = record?;
        out.rows += 1;

        let count = record.get(count_idx).and_then(parse_cell).unwrap_or(0.0);
        if count == 0.0 {
            out.skipped += 1;
            continue;
        }

        let source = match record.get(source_idx) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => UNKNOWN_SOURCE.to_string(),
        };
        *out.totals.entry(source).or_insert(0.0) += count;

        if let Some(campaign) = campaign_idx.and_then(|i| record.get(i)) {
            let campaign = if campaign.is_empty() { "None" } else { campaign };
            *out.campaigns.entry(campaign.to_string()).or_insert(0.0) += count;
        }
    }

    debug!(rows = out.rows, skipped = out.skipped, sources = out.totals.len(), "Read totals export");
    Ok(out)
}

pub fn load_totals_csv(path: &Path, columns: TotalsColumns<'_>) -> Result<SourceTotals> {
    let file = std::fs::File::open(path)?;
    let totals = read_totals_csv(file, columns)?;
    info!(path = %path.display(), total = totals.total(), "Loaded totals export");
    Ok(totals)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonTotals {
    Map(BTreeMap<String, f64>),
    Records(Vec<JsonRecord>),
}

#[derive(Deserialize)]
struct JsonRecord {
    #[serde(alias = "media_source", alias = "channel", alias = "identifier")]
    source: String,
    #[serde(alias = "installs", alias = "new_users", alias = "value")]
    count: f64,
}

/// Decode `{"id": count, ...}` or `[{"source": id, "count": n}, ...]`.
pub fn parse_totals_json(text: &str) -> Result<BTreeMap<String, f64>> {
    let decoded: JsonTotals = serde_json::from_str(text)?;
    let totals = match decoded {
        JsonTotals::Map(map) => map,
        JsonTotals::Records(records) => {
            let mut map = BTreeMap::new();
            for record in records {
                *map.entry(record.source).or_insert(0.0) += record.count;
            }
            map
        }
    };
    Ok(totals)
}

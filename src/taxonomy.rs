//! Canonical channel taxonomy.
//!
//! `ChannelMapping` is the fixed table from canonical channel to the A-side
//! source identifiers it collects. The inverse index is derived from that
//! table on first lookup and never changes afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::warn;

use crate::error::{Error, Result};

/// Bucket for identifiers that no canonical channel claims.
pub const UNMAPPED: &str = "Unmapped";

#[derive(Debug, Clone)]
pub struct ChannelMapping {
    channels: Vec<(String, Vec<String>)>,
    reverse: OnceCell<HashMap<String, usize>>,
}

impl ChannelMapping {
    /// Build a mapping from `(channel, identifiers)` pairs, keeping their order.
    ///
    /// Fails on an empty table, a blank or duplicated channel name, the
    /// reserved `Unmapped` name, or an identifier listed under two channels.
    pub fn new<I, C, S>(table: I) -> Result<Self>
    where
        I: IntoIterator<Item = (C, S)>,
        C: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        let mut channels: Vec<(String, Vec<String>)> = Vec::new();
        let mut owners: HashMap<String, String> = HashMap::new();

        for (channel, sources) in table {
            let channel: String = channel.into();
            if channel.trim().is_empty() {
                return Err(Error::Config("channel name must not be blank".to_string()));
            }
            if channel == UNMAPPED {
                return Err(Error::Config(format!("'{UNMAPPED}' is reserved")));
            }
            if channels.iter().any(|(name, _)| *name == channel) {
                return Err(Error::Config(format!("channel '{channel}' listed twice")));
            }

            let mut seen = HashSet::new();
            let mut identifiers = Vec::new();
            for source in sources {
                let source: String = source.into();
                if !seen.insert(source.clone()) {
                    continue;
                }
                if let Some(owner) = owners.insert(source.clone(), channel.clone()) {
                    return Err(Error::Config(format!(
                        "source '{source}' mapped to both '{owner}' and '{channel}'"
                    )));
                }
                identifiers.push(source);
            }
            channels.push((channel, identifiers));
        }

        if channels.is_empty() {
            return Err(Error::Config("channel mapping table is empty".to_string()));
        }

        Ok(Self {
            channels,
            reverse: OnceCell::new(),
        })
    }

    fn reverse(&self) -> &HashMap<String, usize> {
        self.reverse.get_or_init(|| {
            self.channels
                .iter()
                .enumerate()
                .flat_map(|(i, (_, sources))| sources.iter().map(move |s| (s.clone(), i)))
                .collect()
        })
    }

    /// Canonical channel names in table order.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_channel(&self, name: &str) -> bool {
        self.channels.iter().any(|(n, _)| n == name)
    }

    pub fn sources_for(&self, channel: &str) -> Option<&[String]> {
        self.channels
            .iter()
            .find(|(name, _)| name == channel)
            .map(|(_, sources)| sources.as_slice())
    }

    pub fn channel_for(&self, source: &str) -> Option<&str> {
        self.reverse()
            .get(source)
            .map(|i| self.channels[*i].0.as_str())
    }

    /// Channel for `source`, or `Unmapped`.
    pub fn bucket(&self, source: &str) -> &str {
        self.channel_for(source).unwrap_or(UNMAPPED)
    }
}

/// A source identifier no channel claims, with its accumulated volume.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmappedSource {
    pub source: String,
    pub volume: f64,
}

/// Channel totals for one side of a reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Normalized {
    pub channels: BTreeMap<String, f64>,
    /// Identifiers that need a mapping entry, largest volume first.
    pub needs_mapping: Vec<UnmappedSource>,
}

impl Normalized {
    /// Totals that are already keyed by canonical channel.
    pub fn from_channels<I, S>(totals: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut channels: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (channel, value) in totals {
            channels.entry(channel.into()).or_default().push(value);
        }
        Self {
            channels: channels
                .into_iter()
                .map(|(channel, values)| (channel, stable_sum(values)))
                .collect(),
            needs_mapping: Vec::new(),
        }
    }

    pub fn total(&self) -> f64 {
        stable_sum(self.channels.values().copied().collect())
    }

    pub fn get(&self, channel: &str) -> f64 {
        self.channels.get(channel).copied().unwrap_or(0.0)
    }

    pub fn unmapped_ids(&self) -> Vec<&str> {
        self.needs_mapping.iter().map(|u| u.source.as_str()).collect()
    }

    pub fn unmapped_total(&self) -> f64 {
        stable_sum(self.needs_mapping.iter().map(|u| u.volume).collect())
    }
}

/// Bucket raw per-source totals into canonical channels.
///
/// Every identifier lands in exactly one channel or in `Unmapped`, so the
/// channel sums always add up to the raw total. Sums do not depend on input
/// order.
pub fn normalize<I, S>(raw_totals: I, mapping: &ChannelMapping) -> Normalized
where
    I: IntoIterator<Item = (S, f64)>,
    S: AsRef<str>,
{
    let mut buckets: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut unmapped: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for (source, value) in raw_totals {
        let source = source.as_ref();
        let channel = mapping.bucket(source);
        buckets.entry(channel.to_string()).or_default().push(value);
        if channel == UNMAPPED {
            unmapped.entry(source.to_string()).or_default().push(value);
        }
    }

    let mut needs_mapping: Vec<UnmappedSource> = unmapped
        .into_iter()
        .map(|(source, values)| UnmappedSource {
            source,
            volume: stable_sum(values),
        })
        .collect();
    needs_mapping.sort_by(|a, b| b.volume.total_cmp(&a.volume).then_with(|| a.source.cmp(&b.source)));

    if !needs_mapping.is_empty() {
        warn!(
            count = needs_mapping.len(),
            sources = ?needs_mapping.iter().map(|u| u.source.as_str()).collect::<Vec<_>>(),
            "Sources without a channel mapping"
        );
    }

    Normalized {
        channels: buckets
            .into_iter()
            .map(|(channel, values)| (channel, stable_sum(values)))
            .collect(),
        needs_mapping,
    }
}

/// Totals from a source that already reports canonical channels. Channels
/// the mapping does not know keep their own bucket and are also listed in
/// `needs_mapping`, so the operator sees vocabulary drift on that side.
pub fn normalize_channels<I, S>(totals: I, mapping: &ChannelMapping) -> Normalized
where
    I: IntoIterator<Item = (S, f64)>,
    S: Into<String>,
{
    let mut normalized = Normalized::from_channels(totals);
    let mut unknown: Vec<UnmappedSource> = normalized
        .channels
        .iter()
        .filter(|(channel, _)| !mapping.is_channel(channel) && channel.as_str() != UNMAPPED)
        .map(|(channel, volume)| UnmappedSource {
            source: channel.clone(),
            volume: *volume,
        })
        .collect();
    unknown.sort_by(|a, b| b.volume.total_cmp(&a.volume).then_with(|| a.source.cmp(&b.source)));
    normalized.needs_mapping = unknown;
    normalized
}

/// Sum in sorted order so the result is independent of insertion order.
fn stable_sum(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    values.into_iter().sum()
}

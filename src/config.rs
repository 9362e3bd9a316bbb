use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::extract::PlatformMatchers;
use crate::taxonomy::ChannelMapping;

pub const CONFIG_ENV_VAR: &str = "WEEKLY_RECONCILE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub channels: Vec<ChannelSpec>,
    pub platforms: PlatformLabels,
    pub thresholds: Thresholds,
    pub columns: Columns,
    pub sides: SideLabels,
}

/// One canonical channel and the A-side source identifiers it collects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformLabels {
    pub app: Vec<String>,
    pub web: Vec<String>,
    pub combined: Vec<String>,
}

/// Insight and recommendation thresholds. Percentages are expressed as
/// percent (5.0 means 5%).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub alignment_percent: f64,
    pub significance_floor: f64,
    pub min_abs_difference: f64,
    pub min_relative_percent: f64,
    pub max_channel_insights: usize,
    pub missing_instrumentation_percent: f64,
    pub direct_gap_percent: f64,
    pub paid_search_percent: f64,
    pub max_unmapped_listed: usize,
    pub direct_channel: String,
    pub paid_search_channel: String,
    pub min_campaign_volume: f64,
}

/// Display names of the two reconciled sources and what each one counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SideLabels {
    pub a_name: String,
    pub a_unit: String,
    pub b_name: String,
    pub b_unit: String,
}

/// Column names of the raw per-source exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Columns {
    pub a_source: String,
    pub a_count: String,
    pub a_campaign: String,
    pub b_source: String,
    pub b_count: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            platforms: PlatformLabels::default(),
            thresholds: Thresholds::default(),
            columns: Columns::default(),
            sides: SideLabels::default(),
        }
    }
}

impl Default for SideLabels {
    fn default() -> Self {
        Self {
            a_name: "AppsFlyer".to_string(),
            a_unit: "installs".to_string(),
            b_name: "GA4".to_string(),
            b_unit: "new users".to_string(),
        }
    }
}

impl Default for PlatformLabels {
    fn default() -> Self {
        Self {
            app: vec!["Apps Only".to_string(), "\"\tApp\"".to_string()],
            web: vec!["Web Only".to_string(), "\"\tWeb\"".to_string()],
            combined: vec!["App + Web".to_string()],
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            alignment_percent: 5.0,
            significance_floor: 50.0,
            min_abs_difference: 100.0,
            min_relative_percent: 20.0,
            max_channel_insights: 3,
            missing_instrumentation_percent: 10.0,
            direct_gap_percent: 50.0,
            paid_search_percent: 30.0,
            max_unmapped_listed: 3,
            direct_channel: "Direct".to_string(),
            paid_search_channel: "Paid Search".to_string(),
            min_campaign_volume: 50.0,
        }
    }
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            a_source: "media-source".to_string(),
            a_count: "installs appsflyer".to_string(),
            a_campaign: "campaign".to_string(),
            b_source: "channel".to_string(),
            b_count: "new users".to_string(),
        }
    }
}

fn default_channels() -> Vec<ChannelSpec> {
    let table: [(&str, &[&str]); 10] = [
        ("Direct", &["organic", "QR_code", "print"]),
        ("Paid Search", &["googleadwords_int", "google_ads"]),
        (
            "Organic Search",
            &[
                "google_organic_seo",
                "duckduckgo_organic_seo",
                "yahoo_organic_seo",
                "bing_organic_seo",
            ],
        ),
        ("Paid Social", &["Facebook Ads", "facebook", "Social_Influencers"]),
        ("Email", &["emarsys", "bloomreach", "transactional_postmark"]),
        ("Affiliates", &["impactradius_int", "impact", "mentionme"]),
        ("Paid Shopping", &["google_shopping"]),
        ("Referral", &["website-thortful", "card-back-thortful"]),
        ("Display", &["display_ads"]),
        ("Unassigned", &["unknown", "other"]),
    ];

    table
        .iter()
        .map(|(name, sources)| ChannelSpec {
            name: name.to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
        })
        .collect()
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let settings = Self::from_toml_str(&content)?;
        info!(path = %path.display(), channels = settings.channels.len(), "Loaded settings");
        Ok(settings)
    }

    /// Resolve settings from `cli_arg`, then `WEEKLY_RECONCILE_CONFIG`, then
    /// built-in defaults. Every TOML section is optional.
    pub fn resolve(cli_arg: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_arg {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load(&PathBuf::from(path));
        }

        debug!("No settings file given, using built-in defaults");
        Ok(Self::default())
    }

    pub fn channel_mapping(&self) -> Result<ChannelMapping> {
        ChannelMapping::new(
            self.channels
                .iter()
                .map(|c| (c.name.clone(), c.sources.clone())),
        )
    }

    pub fn platform_matchers(&self) -> PlatformMatchers {
        PlatformMatchers::from_labels(&self.platforms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_build_a_valid_mapping() {
        let settings = Settings::default();
        let mapping = settings.channel_mapping().unwrap();
        assert_eq!(mapping.channel_for("googleadwords_int"), Some("Paid Search"));
        assert_eq!(mapping.channel_for("QR_code"), Some("Direct"));
        assert_eq!(mapping.channels().count(), 10);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [thresholds]
            alignment_percent = 2.5

            [columns]
            b_count = "newUsers"
            "#,
        )
        .unwrap();

        assert_eq!(settings.thresholds.alignment_percent, 2.5);
        assert_eq!(settings.thresholds.min_abs_difference, 100.0);
        assert_eq!(settings.columns.b_count, "newUsers");
        assert_eq!(settings.columns.a_source, "media-source");
        assert_eq!(settings.channels.len(), 10);
    }

    #[test]
    fn channels_section_replaces_table_in_order() {
        let settings = Settings::from_toml_str(
            r#"
            [[channels]]
            name = "Search"
            sources = ["google", "bing"]

            [[channels]]
            name = "Social"
            sources = ["facebook"]
            "#,
        )
        .unwrap();

        let mapping = settings.channel_mapping().unwrap();
        let names: Vec<_> = mapping.channels().collect();
        assert_eq!(names, vec!["Search", "Social"]);
        assert_eq!(mapping.channel_for("bing"), Some("Search"));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[platforms]\napp = [\"iOS + Android\"]").unwrap();

        let settings = Settings::resolve(Some(file.path())).unwrap();
        assert_eq!(settings.platforms.app, vec!["iOS + Android".to_string()]);
        assert_eq!(settings.platforms.combined, vec!["App + Web".to_string()]);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Settings::load(Path::new("/nonexistent/weekly.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_toml_is_reported() {
        assert!(matches!(
            Settings::from_toml_str("[thresholds\nalignment_percent = "),
            Err(Error::Toml(_))
        ));
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::domain::checkpoint::ImportMode;
use crate::domain::error::DomainResult;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourceBudgets {
    /// Listings handled per invocation before yielding (default: 50)
    #[serde(default = "default_max_listings")]
    pub max_listings_per_run: u64,

    /// Full-scope deletions per invocation before yielding (default: 100)
    #[serde(default = "default_max_deletions")]
    pub max_deletions_per_run: u64,

    /// Attachments processed per invocation before yielding (default: 200)
    #[serde(default = "default_max_attachments")]
    pub max_attachments_per_run: u64,

    /// Soft ceiling on one invocation's wall-clock time (default: 25s)
    #[serde(default = "default_max_execution_secs")]
    pub max_execution_secs: u64,

    /// Worst-case estimate for one more listing, subtracted from the time
    /// ceiling (default: 5s)
    #[serde(default = "default_listing_reserve_secs")]
    pub listing_reserve_secs: u64,
}

fn default_max_listings() -> u64 {
    50
}
fn default_max_deletions() -> u64 {
    100
}
fn default_max_attachments() -> u64 {
    200
}
fn default_max_execution_secs() -> u64 {
    25
}
fn default_listing_reserve_secs() -> u64 {
    5
}

impl Default for ResourceBudgets {
    fn default() -> Self {
        Self {
            max_listings_per_run: default_max_listings(),
            max_deletions_per_run: default_max_deletions(),
            max_attachments_per_run: default_max_attachments(),
            max_execution_secs: default_max_execution_secs(),
            listing_reserve_secs: default_listing_reserve_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LanguagePolicy {
    /// Skip listings whose declared language is not available (default: true)
    #[serde(default = "default_true")]
    pub filter_enabled: bool,

    /// Languages the destination can host
    #[serde(default = "default_languages")]
    pub available: Vec<String>,

    /// Language assumed when the feed declares none
    #[serde(default = "default_language")]
    pub default: String,
}

fn default_true() -> bool {
    true
}
fn default_languages() -> Vec<String> {
    vec!["en".to_string()]
}
fn default_language() -> String {
    "en".to_string()
}

impl Default for LanguagePolicy {
    fn default() -> Self {
        Self {
            filter_enabled: default_true(),
            available: default_languages(),
            default: default_language(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValueFilterSettings {
    /// Suppress zero/empty/false-like values after transforms (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Mapping-source prefixes where "0"/empty is itself meaningful
    #[serde(default = "default_exempt_sources")]
    pub exempt_sources: Vec<String>,
}

fn default_exempt_sources() -> Vec<String> {
    vec!["areas->floor".to_string()]
}

impl Default for ValueFilterSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            exempt_sources: default_exempt_sources(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedSettings {
    /// Element holding one agency's listings
    #[serde(default = "default_agency_element")]
    pub agency_element: String,

    /// Element holding one listing
    #[serde(default = "default_listing_element")]
    pub listing_element: String,

    /// Currency symbol when the document declares none
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Unit appended by the area transform
    #[serde(default = "default_area_unit")]
    pub area_unit: String,
}

fn default_agency_element() -> String {
    "provider".to_string()
}
fn default_listing_element() -> String {
    "property".to_string()
}
fn default_currency() -> String {
    "EUR".to_string()
}
fn default_area_unit() -> String {
    "m²".to_string()
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            agency_element: default_agency_element(),
            listing_element: default_listing_element(),
            default_currency: default_currency(),
            area_unit: default_area_unit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Directory holding checkpoints and the kill switch record
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Directory attachments are imported into
    #[serde(default = "default_media_dir")]
    pub media_dir: String,

    /// Path to the delimited mapping table
    #[serde(default = "default_mapping_table")]
    pub mapping_table: String,

    /// Full-scope reconciliation policy
    #[serde(default)]
    pub import_mode: ImportMode,

    /// Checkpoints untouched for longer than this are abandoned (default: 900s)
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold_secs: i64,

    /// Fetch attempts per attachment before it is permanently skipped
    #[serde(default = "default_attachment_attempts")]
    pub max_attachment_attempts: u32,

    /// Page size of the full-scope deletion scan
    #[serde(default = "default_deletion_page_size")]
    pub deletion_page_size: usize,

    /// Review policy: force new and updated listings to pending status
    #[serde(default)]
    pub force_review_status: bool,

    #[serde(default)]
    pub budgets: ResourceBudgets,

    #[serde(default)]
    pub languages: LanguagePolicy,

    #[serde(default)]
    pub value_filter: ValueFilterSettings,

    #[serde(default)]
    pub feed: FeedSettings,

    /// Named code tables for the lookup transform
    #[serde(default)]
    pub code_tables: HashMap<String, HashMap<String, String>>,
}

fn default_state_dir() -> String {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/estatesync/state")
        .to_string_lossy()
        .into_owned()
}

fn default_media_dir() -> String {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/estatesync/media")
        .to_string_lossy()
        .into_owned()
}

fn default_mapping_table() -> String {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/estatesync/mapping.csv")
        .to_string_lossy()
        .into_owned()
}

fn default_stall_threshold() -> i64 {
    900
}
fn default_attachment_attempts() -> u32 {
    3
}
fn default_deletion_page_size() -> usize {
    50
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            media_dir: default_media_dir(),
            mapping_table: default_mapping_table(),
            import_mode: ImportMode::default(),
            stall_threshold_secs: default_stall_threshold(),
            max_attachment_attempts: default_attachment_attempts(),
            deletion_page_size: default_deletion_page_size(),
            force_review_status: false,
            budgets: ResourceBudgets::default(),
            languages: LanguagePolicy::default(),
            value_filter: ValueFilterSettings::default(),
            feed: FeedSettings::default(),
            code_tables: HashMap::new(),
        }
    }
}

// Load settings from config files and environment variables
#[instrument(level = "debug")]
pub fn load_settings(config_path: Option<&Path>) -> DomainResult<Settings> {
    trace!("Loading settings");

    let mut settings = Settings::default();

    let config_sources: Vec<PathBuf> = match config_path {
        Some(p) => vec![p.to_path_buf()],
        None => dirs::home_dir()
            .map(|p| p.join(".config/estatesync/config.toml"))
            .into_iter()
            .collect(),
    };

    for config_path in &config_sources {
        if config_path.exists() {
            trace!("Loading config from: {:?}", config_path);

            if let Ok(config_text) = std::fs::read_to_string(config_path) {
                if let Ok(file_settings) = toml::from_str::<Settings>(&config_text) {
                    settings = file_settings;
                }
            }
        }
    }

    // Override with environment variables
    if let Ok(state_dir) = std::env::var("ESTATESYNC_STATE_DIR") {
        trace!("Using ESTATESYNC_STATE_DIR from environment: {}", state_dir);
        settings.state_dir = state_dir;
    }

    if let Ok(media_dir) = std::env::var("ESTATESYNC_MEDIA_DIR") {
        trace!("Using ESTATESYNC_MEDIA_DIR from environment: {}", media_dir);
        settings.media_dir = media_dir;
    }

    if let Ok(mapping) = std::env::var("ESTATESYNC_MAPPING_TABLE") {
        trace!("Using ESTATESYNC_MAPPING_TABLE from environment: {}", mapping);
        settings.mapping_table = mapping;
    }

    trace!("Settings loaded: {:?}", settings);
    Ok(settings)
}

pub fn generate_default_config() -> String {
    let default_settings = Settings::default();
    toml::to_string_pretty(&default_settings)
        .unwrap_or_else(|_| "# Error generating default configuration".to_string())
}

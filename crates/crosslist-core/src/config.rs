//! Configuration for crosslist-core
//!
//! Every recognized option is a field here; defaults are applied at
//! construction and checked by [`CrosslistConfig::validate`].
//!
//! ```toml
//! data_dir = "/var/lib/crosslist"
//!
//! [sync]
//! grace_window_seconds = 60
//! tombstone_side_b = false
//!
//! [linking]
//! fuzzy_threshold = 0.85
//! case_sensitive = false
//!
//! [conflict]
//! strategy = "newest_wins"
//! default_winner = "a"
//! timestamp_tolerance_seconds = 60
//!
//! [[pairs]]
//! list_a = "My Grocery List"
//! list_b = "Groceries"
//! strategy = "b_wins"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::conflict::ConflictStrategy;
use crate::error::ConfigError;
use crate::model::Side;

/// Upper bound for every seconds-valued setting (100 years)
pub const MAX_WINDOW_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

fn seconds(value: u64, field: &str) -> Result<Duration, ConfigError> {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| ConfigError::OutOfRange(format!("{field} is too large: {value}")))
}

fn check_window(value: u64, field: &str) -> Result<(), ConfigError> {
    if value > MAX_WINDOW_SECONDS {
        return Err(ConfigError::OutOfRange(format!(
            "{field} must be at most {MAX_WINDOW_SECONDS} seconds"
        )));
    }
    Ok(())
}

/// System-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrosslistConfig {
    /// Pass-level settings
    pub sync: SyncConfig,
    /// Item linker settings
    pub linking: LinkerConfig,
    /// Conflict resolver settings
    pub conflict: ResolverConfig,
    /// List pairs to keep in sync
    pub pairs: Vec<ListPairConfig>,
    /// Directory holding one state database per pair
    pub data_dir: PathBuf,
}

impl Default for CrosslistConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            linking: LinkerConfig::default(),
            conflict: ResolverConfig::default(),
            pairs: Vec::new(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".crosslist"))
        .unwrap_or_else(|| PathBuf::from(".crosslist"))
}

/// Pass-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long a side-A item may go unobserved before it is tombstoned
    pub grace_window_seconds: u64,
    /// Apply the side-A tombstoning policy to side B as well
    pub tombstone_side_b: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            grace_window_seconds: 60,
            tombstone_side_b: false,
        }
    }
}

impl SyncConfig {
    pub fn grace_window(&self) -> Result<Duration, ConfigError> {
        seconds(self.grace_window_seconds, "grace_window_seconds")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_window(self.grace_window_seconds, "grace_window_seconds")
    }
}

/// Item linker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    /// Minimum similarity for a fuzzy link (0.0..=1.0)
    pub fuzzy_threshold: f64,
    pub case_sensitive: bool,
    /// Enable the exact-name stage
    pub exact_name_match: bool,
    /// Enable the fuzzy stage
    pub fuzzy_matching: bool,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.85,
            case_sensitive: false,
            exact_name_match: true,
            fuzzy_matching: true,
        }
    }
}

/// Conflict resolver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub strategy: ConflictStrategy,
    /// Winner under `newest_wins` when neither side has a timestamp
    pub default_winner: Side,
    /// Timestamps closer than this are a tie, which side A wins
    pub timestamp_tolerance_seconds: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            strategy: ConflictStrategy::NewestWins,
            default_winner: Side::A,
            timestamp_tolerance_seconds: 60,
        }
    }
}

impl ResolverConfig {
    /// Tie window; saturates instead of overflowing
    pub fn tolerance(&self) -> Duration {
        seconds(self.timestamp_tolerance_seconds, "timestamp_tolerance_seconds")
            .unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_window(self.timestamp_tolerance_seconds, "timestamp_tolerance_seconds")
    }
}

/// One side-A list paired with one side-B list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPairConfig {
    /// List name on side A
    pub list_a: String,
    /// List name on side B
    pub list_b: String,
    /// Overrides the global conflict strategy for this pair
    #[serde(default)]
    pub strategy: Option<ConflictStrategy>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Explicit state database path; derived from `data_dir` when absent
    #[serde(default)]
    pub database: Option<PathBuf>,
}

fn enabled_by_default() -> bool {
    true
}

impl ListPairConfig {
    pub fn new(list_a: impl Into<String>, list_b: impl Into<String>) -> Self {
        Self {
            list_a: list_a.into(),
            list_b: list_b.into(),
            strategy: None,
            enabled: true,
            database: None,
        }
    }

    /// Readable, filesystem-safe label for the pair. Not unique on its own.
    pub fn slug(&self) -> String {
        let raw = format!("{}__{}", self.list_a, self.list_b);
        let mut slug = String::with_capacity(raw.len());
        let mut prev_dash = false;
        for c in raw.chars() {
            if c.is_ascii_alphanumeric() || c == '_' {
                slug.push(c.to_ascii_lowercase());
                prev_dash = false;
            } else if !prev_dash {
                slug.push('-');
                prev_dash = true;
            }
        }
        slug.trim_matches('-').to_string()
    }

    /// Short digest of the raw list names, distinguishing pairs whose slugs collide
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.list_a.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.list_b.as_bytes());
        hasher.finalize().to_hex()[..8].to_string()
    }

    /// State database for this pair
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        self.database.clone().unwrap_or_else(|| {
            data_dir.join(format!("{}-{}.db", self.slug(), self.fingerprint()))
        })
    }
}

impl CrosslistConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Pairs that should be synced
    pub fn enabled_pairs(&self) -> impl Iterator<Item = &ListPairConfig> {
        self.pairs.iter().filter(|p| p.enabled)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sync.validate()?;
        self.linking.validate()?;
        self.conflict.validate()?;

        for pair in &self.pairs {
            if pair.list_a.trim().is_empty() {
                return Err(ConfigError::MissingField("pairs.list_a".to_string()));
            }
            if pair.list_b.trim().is_empty() {
                return Err(ConfigError::MissingField("pairs.list_b".to_string()));
            }
        }

        // Every enabled pair needs a database of its own
        let mut databases: HashMap<PathBuf, &ListPairConfig> = HashMap::new();
        for pair in self.enabled_pairs() {
            let path = pair.database_path(&self.data_dir);
            if let Some(other) = databases.insert(path.clone(), pair) {
                return Err(ConfigError::OutOfRange(format!(
                    "pairs '{} <-> {}' and '{} <-> {}' share database {}",
                    other.list_a,
                    other.list_b,
                    pair.list_a,
                    pair.list_b,
                    path.display()
                )));
            }
        }

        Ok(())
    }
}

impl LinkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(ConfigError::OutOfRange(
                "fuzzy_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CrosslistConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.grace_window_seconds, 60);
        assert_eq!(config.linking.fuzzy_threshold, 0.85);
        assert_eq!(config.conflict.strategy, ConflictStrategy::NewestWins);
        assert_eq!(config.conflict.default_winner, Side::A);
    }

    #[test]
    fn test_toml_partial_sections() {
        let config = CrosslistConfig::from_toml(
            r#"
            data_dir = "/tmp/crosslist"

            [linking]
            fuzzy_threshold = 0.9

            [conflict]
            strategy = "b_wins"

            [[pairs]]
            list_a = "My Grocery List"
            list_b = "Groceries"
            "#,
        )
        .unwrap();

        assert_eq!(config.linking.fuzzy_threshold, 0.9);
        assert!(!config.linking.case_sensitive);
        assert_eq!(config.conflict.strategy, ConflictStrategy::BWins);
        assert_eq!(config.conflict.timestamp_tolerance_seconds, 60);
        assert_eq!(config.pairs.len(), 1);
        assert!(config.pairs[0].enabled);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/crosslist"));
    }

    #[test]
    fn test_json_serialization() {
        let mut config = CrosslistConfig::default();
        config.pairs.push(ListPairConfig::new("A list", "B list"));
        let json = config.to_json().unwrap();
        let parsed = CrosslistConfig::from_json(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_out_of_range_threshold() {
        let mut config = CrosslistConfig::default();
        config.linking.fuzzy_threshold = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(_))));
    }

    #[test]
    fn test_empty_list_name_rejected() {
        let mut config = CrosslistConfig::default();
        config.pairs.push(ListPairConfig::new("  ", "Groceries"));
        assert!(matches!(config.validate(), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_pair_database_path() {
        let pair = ListPairConfig::new("My Grocery List", "Groceries!");
        assert_eq!(pair.slug(), "my-grocery-list__groceries");
        assert_eq!(pair.fingerprint().len(), 8);
        assert_eq!(
            pair.database_path(Path::new("/data")),
            PathBuf::from(format!("/data/my-grocery-list__groceries-{}.db", pair.fingerprint()))
        );
        assert_eq!(pair.fingerprint(), pair.clone().fingerprint());
    }

    #[test]
    fn test_colliding_slugs_get_distinct_databases() {
        let spaced = ListPairConfig::new("My List", "Groceries");
        let dashed = ListPairConfig::new("My-List", "Groceries!");
        assert_eq!(spaced.slug(), dashed.slug());

        let data = Path::new("/data");
        assert_ne!(spaced.database_path(data), dashed.database_path(data));

        let mut config = CrosslistConfig::default();
        config.pairs = vec![spaced, dashed];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shared_database_rejected() {
        let mut config = CrosslistConfig::default();
        let mut first = ListPairConfig::new("Weekly", "Groceries");
        first.database = Some(PathBuf::from("/data/shared.db"));
        let mut second = ListPairConfig::new("Hardware", "Errands");
        second.database = Some(PathBuf::from("/data/shared.db"));
        config.pairs = vec![first, second];
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(_))));

        // A disabled pair never opens its store
        config.pairs[1].enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_window_settings_are_bounded() {
        let mut config = CrosslistConfig::default();
        config.sync.grace_window_seconds = 10_000_000_000_000;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(_))));
        assert!(config.sync.grace_window().is_ok());

        config.sync.grace_window_seconds = u64::MAX;
        assert!(matches!(config.sync.grace_window(), Err(ConfigError::OutOfRange(_))));

        let mut config = CrosslistConfig::default();
        config.conflict.timestamp_tolerance_seconds = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(_))));
        assert_eq!(config.conflict.tolerance(), Duration::MAX);

        config.conflict.timestamp_tolerance_seconds = MAX_WINDOW_SECONDS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crosslist.toml");
        std::fs::write(&path, "[sync]\ntombstone_side_b = true\n").unwrap();
        let config = CrosslistConfig::load(&path).unwrap();
        assert!(config.sync.tombstone_side_b);

        let missing = CrosslistConfig::load(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}

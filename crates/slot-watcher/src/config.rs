use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared_types::{TargetId, TimeOfDay, WatchRule, Weekday};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{WatchError, WatchResult};
use crate::targets::{TargetDescriptor, TargetRegistry};

const MAX_RETENTION_DAYS: u32 = 3650;

/// Configuration file as written by the user (TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// How often to run a check cycle (minutes)
    #[serde(default = "default_check_interval")]
    pub check_interval_minutes: u64,

    /// Playing duration requested from the booking pages (minutes)
    #[serde(default = "default_duration")]
    pub duration_minutes: u32,

    /// Deadline for a single scrape call (seconds)
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout_secs: u64,

    /// Pause between consecutive scrapes of the same target (seconds)
    #[serde(default = "default_request_delay")]
    pub request_delay_secs: u64,

    /// Maximum number of targets scraped at the same time
    #[serde(default = "default_max_parallel")]
    pub max_parallel_targets: usize,

    /// Drop state for dates older than this many days (0 keeps everything)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Notify about everything seen on the first cycle after a fresh start
    #[serde(default)]
    pub notify_on_cold_start: bool,

    /// State document path; defaults to `$DATA_DIR/state.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,

    pub ntfy: NtfyConfig,

    /// Scraper families, keyed by family name
    #[serde(default)]
    pub scrapers: BTreeMap<String, ScraperConfig>,

    /// Watched facilities, keyed by target id
    pub targets: BTreeMap<String, TargetConfig>,

    #[serde(default)]
    pub watches: Vec<WatchConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtfyConfig {
    pub topic: String,

    #[serde(default = "default_ntfy_server")]
    pub server: String,

    #[serde(default = "default_priority")]
    pub priority: String,

    #[serde(default = "default_tags")]
    pub tags: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Program and leading arguments of the external scraper
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub family: String,
    pub location: String,
    pub base_url: String,
    pub url_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub court_type: Option<String>,
    #[serde(default)]
    pub age_confirmation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub targets: Vec<String>,
    pub weekday: String,
    pub time_from: String,
    pub time_to: String,
    #[serde(default = "default_weeks_ahead")]
    pub weeks_ahead: u32,
}

fn default_check_interval() -> u64 {
    5
}

fn default_duration() -> u32 {
    90
}

fn default_scrape_timeout() -> u64 {
    90
}

fn default_request_delay() -> u64 {
    2
}

fn default_max_parallel() -> usize {
    2
}

fn default_retention_days() -> u32 {
    14
}

fn default_weeks_ahead() -> u32 {
    4
}

fn default_ntfy_server() -> String {
    "https://ntfy.sh".to_string()
}

fn default_priority() -> String {
    "high".to_string()
}

fn default_tags() -> String {
    "tennis".to_string()
}

/// Validated configuration consumed by the watcher core
#[derive(Debug, Clone)]
pub struct Settings {
    pub interval: Duration,
    pub duration_minutes: u32,
    pub scrape_timeout: Duration,
    pub request_delay: Duration,
    pub max_parallel_targets: usize,
    pub retention_days: u32,
    pub notify_on_cold_start: bool,
    pub state_path: PathBuf,
    pub ntfy: NtfyConfig,
    pub scrapers: BTreeMap<String, ScraperConfig>,
    pub registry: TargetRegistry,
    pub watches: Vec<WatchRule>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Check every field and build the typed settings.
    ///
    /// `data_dir` is used for the state document when `state_path` is unset.
    pub fn validate(self, data_dir: &Path) -> WatchResult<Settings> {
        if self.ntfy.topic.trim().is_empty() {
            return Err(WatchError::config("ntfy.topic is required"));
        }
        if self.watches.is_empty() {
            return Err(WatchError::config("At least one [[watches]] entry is required"));
        }
        if self.check_interval_minutes < 1 {
            return Err(WatchError::config("check_interval_minutes must be at least 1"));
        }
        if self.duration_minutes < 1 {
            return Err(WatchError::config("duration_minutes must be at least 1"));
        }
        if self.max_parallel_targets < 1 {
            return Err(WatchError::config("max_parallel_targets must be at least 1"));
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(WatchError::config(format!(
                "retention_days must be at most {} (0 disables pruning)",
                MAX_RETENTION_DAYS
            )));
        }
        for (family, scraper) in &self.scrapers {
            if scraper.command.is_empty() || scraper.command[0].trim().is_empty() {
                return Err(WatchError::config(format!("scrapers.{}.command is empty", family)));
            }
        }

        let descriptors = self
            .targets
            .iter()
            .map(|(id, target)| {
                if !self.scrapers.contains_key(&target.family) {
                    return Err(WatchError::config(format!(
                        "targets.{} uses unknown scraper family '{}'. Available: {}",
                        id,
                        target.family,
                        join_keys(&self.scrapers)
                    )));
                }
                Ok(TargetDescriptor {
                    id: TargetId::new(id.as_str()),
                    name: target.name.clone(),
                    family: target.family.clone(),
                    location: target.location.clone(),
                    base_url: target.base_url.clone(),
                    url_template: target.url_template.clone(),
                    court_type: target.court_type.clone(),
                    age_confirmation: target.age_confirmation,
                })
            })
            .collect::<WatchResult<Vec<_>>>()?;
        let registry = TargetRegistry::new(descriptors)?;

        let watches = self
            .watches
            .iter()
            .enumerate()
            .map(|(i, watch)| watch.to_rule(i, &registry))
            .collect::<WatchResult<Vec<_>>>()?;

        let state_path = self
            .state_path
            .clone()
            .unwrap_or_else(|| data_dir.join("state.json"));

        Ok(Settings {
            interval: Duration::from_secs(self.check_interval_minutes * 60),
            duration_minutes: self.duration_minutes,
            scrape_timeout: Duration::from_secs(self.scrape_timeout_secs.max(1)),
            request_delay: Duration::from_secs(self.request_delay_secs),
            max_parallel_targets: self.max_parallel_targets,
            retention_days: self.retention_days,
            notify_on_cold_start: self.notify_on_cold_start,
            state_path,
            ntfy: self.ntfy,
            scrapers: self.scrapers,
            registry,
            watches,
        })
    }

    pub fn example() -> Self {
        let mut scrapers = BTreeMap::new();
        scrapers.insert(
            "padelcasa".to_string(),
            ScraperConfig {
                command: vec!["python3".to_string(), "scraper.py".to_string()],
            },
        );

        let mut targets = BTreeMap::new();
        targets.insert(
            "padelcasa-utrecht".to_string(),
            TargetConfig {
                name: "PadelCasa Utrecht".to_string(),
                family: "padelcasa".to_string(),
                location: "Utrecht".to_string(),
                base_url: "https://www.padelcasa.com/pages/utrecht".to_string(),
                url_template: "{base_url}#/court-booking/reservation?location={location}&date={date}&playingTimes={duration}"
                    .to_string(),
                court_type: None,
                age_confirmation: true,
            },
        );

        Config {
            check_interval_minutes: 5,
            duration_minutes: 90,
            scrape_timeout_secs: 90,
            request_delay_secs: 2,
            max_parallel_targets: 2,
            retention_days: 14,
            notify_on_cold_start: false,
            state_path: None,
            ntfy: NtfyConfig {
                topic: "my-padel-alerts".to_string(),
                server: default_ntfy_server(),
                priority: default_priority(),
                tags: default_tags(),
            },
            scrapers,
            targets,
            watches: vec![WatchConfig {
                targets: vec!["padelcasa-utrecht".to_string()],
                weekday: "tuesday".to_string(),
                time_from: "18:00".to_string(),
                time_to: "21:00".to_string(),
                weeks_ahead: 4,
            }],
        }
    }
}

impl WatchConfig {
    fn to_rule(&self, index: usize, registry: &TargetRegistry) -> WatchResult<WatchRule> {
        let prefix = |msg: String| WatchError::config(format!("watches[{}]: {}", index, msg));

        let weekday: Weekday = self
            .weekday
            .parse()
            .map_err(|e: shared_types::ParseError| prefix(e.to_string()))?;
        let time_from: TimeOfDay = self
            .time_from
            .parse()
            .map_err(|e: shared_types::ParseError| prefix(e.to_string()))?;
        let time_to: TimeOfDay = self
            .time_to
            .parse()
            .map_err(|e: shared_types::ParseError| prefix(e.to_string()))?;

        let mut targets = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let id = TargetId::new(target.as_str());
            if !registry.contains(&id) {
                let available: Vec<&str> = registry.ids().map(|t| t.as_str()).collect();
                return Err(prefix(format!(
                    "references unknown target '{}'. Available: {}",
                    target,
                    available.join(", ")
                )));
            }
            targets.push(id);
        }

        WatchRule::new(targets, weekday, time_from, time_to, self.weeks_ahead)
            .map_err(|e| prefix(e.to_string()))
    }
}

fn join_keys<V>(map: &BTreeMap<String, V>) -> String {
    map.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Config file location: explicit path, then `CONFIG_PATH`, then `config.toml`
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var("CONFIG_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

/// Directory holding persistent state: `DATA_DIR` or `./data`
pub fn data_dir() -> PathBuf {
    std::env::var("DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

/// Load `.env`, read the config file and validate it
pub fn load_settings(explicit: Option<PathBuf>) -> Result<Settings> {
    dotenvy::dotenv().ok();

    let path = resolve_config_path(explicit);
    tracing::info!("Loading config from {}", path.display());

    let config = Config::load(&path)?;
    let settings = config.validate(&data_dir())?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
check_interval_minutes = 10

[ntfy]
topic = "alerts"

[scrapers.padelcasa]
command = ["python3", "scraper.py"]

[targets.utrecht]
name = "PadelCasa Utrecht"
family = "padelcasa"
location = "Utrecht"
base_url = "https://www.padelcasa.com/pages/utrecht"
url_template = "{base_url}#/court-booking/reservation?location={location}&date={date}&playingTimes={duration}"

[[watches]]
targets = ["utrecht"]
weekday = "Tuesday"
time_from = "18:00"
time_to = "21:00"
"#;

    fn sample() -> Config {
        Config::from_toml_str(SAMPLE).expect("sample should parse")
    }

    #[test]
    fn test_defaults_applied() {
        let settings = sample().validate(Path::new("/var/lib/watcher")).unwrap();
        assert_eq!(settings.interval, Duration::from_secs(600));
        assert_eq!(settings.duration_minutes, 90);
        assert_eq!(settings.request_delay, Duration::from_secs(2));
        assert_eq!(settings.retention_days, 14);
        assert!(!settings.notify_on_cold_start);
        assert_eq!(settings.ntfy.server, "https://ntfy.sh");
        assert_eq!(settings.ntfy.priority, "high");
        assert_eq!(settings.state_path, PathBuf::from("/var/lib/watcher/state.json"));

        let rule = &settings.watches[0];
        assert_eq!(rule.weekday(), Weekday::Tuesday);
        assert_eq!(rule.horizon_count(), 4);
        assert_eq!(rule.targets(), &[TargetId::new("utrecht")]);
    }

    #[test]
    fn test_explicit_state_path_wins() {
        let mut config = sample();
        config.state_path = Some(PathBuf::from("/tmp/custom.json"));
        let settings = config.validate(Path::new("data")).unwrap();
        assert_eq!(settings.state_path, PathBuf::from("/tmp/custom.json"));
    }

    #[test]
    fn test_missing_topic_rejected() {
        let mut config = sample();
        config.ntfy.topic = "  ".to_string();
        let err = config.validate(Path::new("data")).unwrap_err();
        assert!(err.to_string().contains("ntfy.topic"));
    }

    #[test]
    fn test_no_watches_rejected() {
        let mut config = sample();
        config.watches.clear();
        assert!(config.validate(Path::new("data")).is_err());
    }

    #[test]
    fn test_bad_weekday_rejected() {
        let mut config = sample();
        config.watches[0].weekday = "funday".to_string();
        let err = config.validate(Path::new("data")).unwrap_err();
        assert!(err.to_string().contains("watches[0]"), "{}", err);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let mut config = sample();
        config.watches[0].targets.push("amsterdam".to_string());
        let err = config.validate(Path::new("data")).unwrap_err();
        assert!(err.to_string().contains("amsterdam"), "{}", err);
    }

    #[test]
    fn test_inverted_window_rejected() {
        let mut config = sample();
        config.watches[0].time_from = "21:00".to_string();
        config.watches[0].time_to = "18:00".to_string();
        assert!(config.validate(Path::new("data")).is_err());
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let mut config = sample();
        config.watches[0].weeks_ahead = 0;
        assert!(config.validate(Path::new("data")).is_err());
    }

    #[test]
    fn test_empty_target_list_rejected() {
        let mut config = sample();
        config.watches[0].targets.clear();
        assert!(config.validate(Path::new("data")).is_err());
    }

    #[test]
    fn test_unknown_family_rejected() {
        let mut config = sample();
        config.scrapers.clear();
        let err = config.validate(Path::new("data")).unwrap_err();
        assert!(err.to_string().contains("padelcasa"), "{}", err);
    }

    #[test]
    fn test_empty_scraper_command_rejected() {
        let mut config = sample();
        config.scrapers.get_mut("padelcasa").unwrap().command.clear();
        assert!(config.validate(Path::new("data")).is_err());
    }

    #[test]
    fn test_retention_bounded() {
        let mut config = sample();
        config.retention_days = u32::MAX;
        let err = config.validate(Path::new("data")).unwrap_err();
        assert!(err.to_string().contains("retention_days"));

        let mut config = sample();
        config.retention_days = 3650;
        assert!(config.validate(Path::new("data")).is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = sample();
        config.check_interval_minutes = 0;
        assert!(config.validate(Path::new("data")).is_err());
    }

    #[test]
    fn test_example_is_valid() {
        let settings = Config::example().validate(Path::new("data")).unwrap();
        assert_eq!(settings.registry.len(), 1);
        assert_eq!(settings.watches.len(), 1);
    }

    #[test]
    fn test_example_round_trips_through_toml() {
        let text = toml::to_string(&Config::example()).unwrap();
        let parsed = Config::from_toml_str(&text).unwrap();
        assert_eq!(parsed.targets.len(), 1);
        assert_eq!(parsed.watches[0].weekday, "tuesday");
    }

    #[test]
    fn test_shipped_example_file_is_valid() {
        let config = Config::from_toml_str(include_str!("../../../config.example.toml")).unwrap();
        let settings = config.validate(Path::new("/var/lib/slot-watcher")).unwrap();
        assert_eq!(settings.state_path, Path::new("/var/lib/slot-watcher/state.json"));
        assert_eq!(settings.interval, Duration::from_secs(300));
        assert_eq!(settings.watches[0].horizon_count(), 4);
    }
}

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::convert::{RateConvention, UnitTable, BASE_UNIT, HOURS_UNIT};
use crate::error::{RepricerError, Result};
use crate::scan::DEFAULT_THRESHOLD;
use crate::watch::{Trigger, DEFAULT_INITIAL, DEFAULT_MAX};

/// User settings, read at the start of every pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Unit name -> exchange rate against the base currency
    #[serde(default)]
    pub units: BTreeMap<String, f64>,

    /// Show converted text instead of the plain amount
    #[serde(default)]
    pub do_replace: bool,

    /// Literal currency symbol to look for
    #[serde(default = "default_symbol")]
    pub currency_symbol: String,

    /// Minimum share of a node's text that must be currency
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// How `units` rates are read
    #[serde(default)]
    pub rate_convention: RateConvention,

    /// Re-scan timing
    #[serde(default)]
    pub backoff: BackoffSettings,
}

/// Timing of self-scheduled passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffSettings {
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

fn default_symbol() -> String {
    "$".to_string()
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_initial_ms() -> u64 {
    DEFAULT_INITIAL.as_millis() as u64
}

fn default_factor() -> f64 {
    1.5
}

fn default_max_ms() -> u64 {
    DEFAULT_MAX.as_millis() as u64
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            factor: default_factor(),
            max_ms: default_max_ms(),
        }
    }
}

/// Absent configuration: no units, plain display.
impl Default for Settings {
    fn default() -> Self {
        Self {
            units: BTreeMap::new(),
            do_replace: false,
            currency_symbol: default_symbol(),
            threshold: default_threshold(),
            rate_convention: RateConvention::default(),
            backoff: BackoffSettings::default(),
        }
    }
}

impl Settings {
    /// Settings written by `repricer init`: 20 currency units per hour of work,
    /// replacement on.
    pub fn starter() -> Self {
        let mut settings = Self {
            do_replace: true,
            ..Self::default()
        };
        settings.units.insert(HOURS_UNIT.to_string(), 1.0 / 20.0);
        settings
    }

    pub fn unit_table(&self) -> UnitTable {
        UnitTable::new(self.units.clone(), self.rate_convention)
    }

    /// Set a unit from its user-facing value.
    ///
    /// Hours are entered as currency per hour; with the default convention they
    /// are stored as the reciprocal.
    pub fn set_unit(&mut self, name: &str, value: f64) -> Result<()> {
        let name = name.trim().to_lowercase();
        if name.is_empty() || name == BASE_UNIT {
            return Err(RepricerError::InvalidUnit(format!(
                "'{}' cannot be changed",
                name
            )));
        }
        if !value.is_finite() || value <= 0.0 {
            return Err(RepricerError::InvalidUnit(format!(
                "{} = {} (must be a positive number)",
                name, value
            )));
        }

        let stored = if self.inverts(&name) { 1.0 / value } else { value };
        self.units.insert(name, stored);
        Ok(())
    }

    /// Remove a unit. Returns whether it existed.
    pub fn remove_unit(&mut self, name: &str) -> bool {
        self.units.remove(&name.trim().to_lowercase()).is_some()
    }

    /// The user-facing value of a unit (inverse of [`Settings::set_unit`]).
    pub fn display_unit(&self, name: &str) -> Option<f64> {
        let rate = *self.units.get(name)?;
        Some(if self.inverts(name) { 1.0 / rate } else { rate })
    }

    fn inverts(&self, name: &str) -> bool {
        name == HOURS_UNIT && self.rate_convention == RateConvention::UnitsPerBase
    }
}

/// Key-value storage for [`Settings`] with change notification.
pub trait ConfigStore {
    fn load(&self) -> Result<Settings>;

    fn save(&self, settings: &Settings) -> Result<()>;

    /// Send [`Trigger::ConfigChanged`] on `tx` whenever the stored settings change.
    fn subscribe(&self, tx: Sender<Trigger>) -> Result<()>;
}

/// Settings in a TOML file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Store at the default location.
    ///
    /// Supports the REPRICER_CONFIG environment variable for test isolation
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    /// Get the config file path
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("REPRICER_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let dirs = ProjectDirs::from("", "", "repricer")
            .ok_or_else(|| RepricerError::ConfigError("Could not determine config directory".into()))?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl ConfigStore for FileStore {
    fn load(&self) -> Result<Settings> {
        if self.path.exists() {
            let content = std::fs::read_to_string(&self.path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Settings::default())
        }
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(settings)
            .map_err(|e| RepricerError::ConfigError(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Polls the file's modification time on a background thread. The thread
    /// exits once the receiving side is dropped.
    fn subscribe(&self, tx: Sender<Trigger>) -> Result<()> {
        let path = self.path.clone();
        let interval = self.poll_interval;
        let mut last = modified(&path);

        std::thread::Builder::new()
            .name("repricer-config-watch".into())
            .spawn(move || loop {
                std::thread::sleep(interval);
                let current = modified(&path);
                if current != last {
                    last = current;
                    tracing::debug!(path = %path.display(), "settings file changed");
                    if tx.send(Trigger::ConfigChanged).is_err() {
                        break;
                    }
                }
            })?;
        Ok(())
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Settings held in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    settings: Mutex<Settings>,
    subscribers: Mutex<Vec<Sender<Trigger>>>,
}

impl MemoryStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<Settings> {
        let settings = self.settings.lock().unwrap_or_else(|e| e.into_inner());
        Ok(settings.clone())
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        *self.settings.lock().unwrap_or_else(|e| e.into_inner()) = settings.clone();

        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(Trigger::ConfigChanged).is_ok());
        Ok(())
    }

    fn subscribe(&self, tx: Sender<Trigger>) -> Result<()> {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.units.is_empty());
        assert!(!settings.do_replace);
        assert_eq!(settings.currency_symbol, "$");
        assert_eq!(settings.backoff.initial_ms, 250);
        assert_eq!(settings.backoff.max_ms, 6000);
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let settings: Settings = toml::from_str("do_replace = true\n[units]\ncoffees = 0.25\n").unwrap();
        assert!(settings.do_replace);
        assert_eq!(settings.units.get("coffees"), Some(&0.25));
        assert_eq!(settings.threshold, DEFAULT_THRESHOLD);
        assert_eq!(settings.rate_convention, RateConvention::UnitsPerBase);
    }

    #[test]
    fn test_rate_convention_key() {
        let settings: Settings = toml::from_str("rate_convention = \"base_per_unit\"\n").unwrap();
        assert_eq!(settings.rate_convention, RateConvention::BasePerUnit);
    }

    #[test]
    fn test_hours_entered_per_hour() {
        let mut settings = Settings::default();
        settings.set_unit("hours", 20.0).unwrap();
        assert_eq!(settings.units.get("hours"), Some(&0.05));
        assert_eq!(settings.display_unit("hours"), Some(20.0));

        settings.set_unit("Coffees", 0.25).unwrap();
        assert_eq!(settings.units.get("coffees"), Some(&0.25));
    }

    #[test]
    fn test_hours_not_inverted_for_base_per_unit() {
        let mut settings = Settings {
            rate_convention: RateConvention::BasePerUnit,
            ..Settings::default()
        };
        settings.set_unit("hours", 20.0).unwrap();
        assert_eq!(settings.units.get("hours"), Some(&20.0));
    }

    #[test]
    fn test_invalid_units_rejected() {
        let mut settings = Settings::default();
        assert!(settings.set_unit("coffees", 0.0).is_err());
        assert!(settings.set_unit("coffees", f64::INFINITY).is_err());
        assert!(settings.set_unit("dollars", 2.0).is_err());
        assert!(settings.units.is_empty());
    }

    #[test]
    fn test_memory_store_notifies() {
        let store = MemoryStore::default();
        let (tx, rx) = mpsc::channel();
        store.subscribe(tx).unwrap();

        store.save(&Settings::starter()).unwrap();
        assert!(matches!(rx.try_recv(), Ok(Trigger::ConfigChanged)));
        assert!(store.load().unwrap().do_replace);
    }
}

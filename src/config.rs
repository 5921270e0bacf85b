//! Runtime configuration loaded from the environment (and an optional `.env` file).

use crate::error::{AppError, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Placeholder value shipped in sample `.env` files.
const PLACEHOLDER_KEY: &str = "YOUR_API_KEY_HERE";
/// Keys shorter than this are treated as not configured.
const MIN_KEY_LEN: usize = 6;

/// Settings shared by the fetcher, cache, model registry and CLI.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Key for the government station feed. `None` skips that tier.
    pub cpcb_api_key: Option<String>,
    /// Key for the commercial air-pollution history API. `None` skips that tier.
    pub owm_api_key: Option<String>,
    pub model_dir: PathBuf,
    pub data_dir: PathBuf,
    pub cache_ttl_minutes: i64,
    pub fetch_timeout: Duration,
    /// Window requested by the realtime fetch, in hours.
    pub realtime_hours: u32,
    /// Cities whose model artifacts are loaded at startup.
    pub cities: Vec<String>,
    /// Directory for JSON log files; `None` logs to the console only.
    pub log_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cpcb_api_key: None,
            owm_api_key: None,
            model_dir: PathBuf::from("models"),
            data_dir: PathBuf::from("data"),
            cache_ttl_minutes: 30,
            fetch_timeout: Duration::from_secs(30),
            realtime_hours: 48,
            cities: vec!["Delhi".to_string(), "Pune".to_string()],
            log_dir: None,
        }
    }
}

impl Settings {
    /// Loads `.env` (if present) and reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when a numeric variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        if dotenv::dotenv().is_ok() {
            debug!("Loaded variables from .env");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cities = lookup("AQI_CITIES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|cities| !cities.is_empty())
            .unwrap_or(defaults.cities);

        let settings = Self {
            cpcb_api_key: api_key(lookup("CPCB_API_KEY"), "CPCB_API_KEY"),
            owm_api_key: api_key(lookup("OPENWEATHERMAP_API_KEY"), "OPENWEATHERMAP_API_KEY"),
            model_dir: lookup("AQI_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            data_dir: lookup("AQI_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            cache_ttl_minutes: parse_var(&lookup, "AQI_CACHE_TTL_MINUTES")?
                .unwrap_or(defaults.cache_ttl_minutes),
            fetch_timeout: parse_var::<u64, _>(&lookup, "AQI_FETCH_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_timeout),
            realtime_hours: parse_var(&lookup, "AQI_REALTIME_HOURS")?
                .unwrap_or(defaults.realtime_hours),
            cities,
            log_dir: lookup("AQI_LOG_DIR")
                .filter(|d| !d.trim().is_empty())
                .map(PathBuf::from),
        };

        if settings.cache_ttl_minutes <= 0 {
            return Err(AppError::Config(
                "AQI_CACHE_TTL_MINUTES must be positive".to_string(),
            ));
        }

        Ok(settings)
    }
}

/// Returns the key unless it is empty, a placeholder or implausibly short.
fn api_key(raw: Option<String>, name: &str) -> Option<String> {
    let key = raw?.trim().to_string();
    if key.is_empty() || key == PLACEHOLDER_KEY || key.len() < MIN_KEY_LEN {
        warn!("{} is not configured; that data source will be skipped", name);
        return None;
    }
    Some(key)
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{} has an invalid value: '{}'", name, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let settings = Settings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings.cache_ttl_minutes, 30);
        assert_eq!(settings.fetch_timeout, Duration::from_secs(30));
        assert_eq!(settings.realtime_hours, 48);
        assert_eq!(settings.cities, vec!["Delhi", "Pune"]);
        assert!(settings.cpcb_api_key.is_none());
        assert!(settings.log_dir.is_none());
    }

    #[test]
    fn test_placeholder_and_short_keys_count_as_absent() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("CPCB_API_KEY", "YOUR_API_KEY_HERE"),
            ("OPENWEATHERMAP_API_KEY", "abc"),
        ]))
        .unwrap();
        assert!(settings.cpcb_api_key.is_none());
        assert!(settings.owm_api_key.is_none());

        let settings =
            Settings::from_lookup(lookup_from(&[("OPENWEATHERMAP_API_KEY", " 0123456789abcdef ")]))
                .unwrap();
        assert_eq!(settings.owm_api_key.as_deref(), Some("0123456789abcdef"));
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = Settings::from_lookup(lookup_from(&[("AQI_CACHE_TTL_MINUTES", "soon")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err =
            Settings::from_lookup(lookup_from(&[("AQI_CACHE_TTL_MINUTES", "0")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_city_list_is_trimmed() {
        let settings =
            Settings::from_lookup(lookup_from(&[("AQI_CITIES", " Delhi , Mumbai,, ")])).unwrap();
        assert_eq!(settings.cities, vec!["Delhi", "Mumbai"]);
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        env::set_var("AQI_FETCH_TIMEOUT_SECS", "5");
        env::set_var("AQI_MODEL_DIR", "/tmp/aqi-models");

        let settings = Settings::from_env().unwrap();

        env::remove_var("AQI_FETCH_TIMEOUT_SECS");
        env::remove_var("AQI_MODEL_DIR");

        assert_eq!(settings.fetch_timeout, Duration::from_secs(5));
        assert_eq!(settings.model_dir, PathBuf::from("/tmp/aqi-models"));
    }
}

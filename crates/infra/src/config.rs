//! Process configuration from environment variables.
//!
//! `AppConfig::from_env` reads the process environment; `from_lookup` takes
//! any key lookup so tests never touch global state.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use stocklink_core::LocationId;
use stocklink_inventory::catalog::DEFAULT_BATCH_SIZE;
use stocklink_inventory::{SyncSettings, TrackerConfig};

use crate::catalog::GraphqlCatalogConfig;

pub const DEFAULT_API_VERSION: &str = "2024-10";
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Which `CatalogClient` the binary wires in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogBackend {
    /// The remote GraphQL Admin API.
    Graphql,
    /// In-process catalog, optionally seeded from a JSON file.
    Memory { seed: Option<PathBuf> },
}

#[derive(Clone)]
pub struct AppConfig {
    pub shop: String,
    pub access_token: String,
    pub webhook_secret: String,
    pub api_version: String,
    pub port: u16,
    pub default_location: Option<LocationId>,
    pub sync_window: Duration,
    pub quantity_tolerance: i64,
    pub lock_attempts: u32,
    pub lock_backoff: Duration,
    pub batch_size: usize,
    pub jitter_max: Duration,
    pub deadline: Duration,
    pub sweep_interval: Duration,
    pub catalog: CatalogBackend,
}

impl AppConfig {
    /// Defaults for everything optional; used by tests and local runs.
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            shop: String::new(),
            access_token: String::new(),
            webhook_secret: webhook_secret.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            port: DEFAULT_PORT,
            default_location: None,
            sync_window: Duration::from_secs(15),
            quantity_tolerance: 0,
            lock_attempts: 3,
            lock_backoff: Duration::from_millis(200),
            batch_size: DEFAULT_BATCH_SIZE,
            jitter_max: Duration::ZERO,
            deadline: Duration::from_secs(4),
            sweep_interval: Duration::from_secs(5),
            catalog: CatalogBackend::Memory { seed: None },
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let catalog = match get("STOCKLINK_CATALOG").as_deref() {
            None | Some("graphql") => CatalogBackend::Graphql,
            Some("memory") => CatalogBackend::Memory {
                seed: get("STOCKLINK_CATALOG_SEED").map(PathBuf::from),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STOCKLINK_CATALOG",
                    reason: format!("expected 'graphql' or 'memory', got '{other}'"),
                });
            }
        };

        // The in-memory catalog never talks to the shop.
        let (shop, access_token) = match catalog {
            CatalogBackend::Graphql => (
                required("SHOPIFY_SHOP")?,
                required("SHOPIFY_ACCESS_TOKEN")?,
            ),
            CatalogBackend::Memory { .. } => (
                get("SHOPIFY_SHOP").unwrap_or_default(),
                get("SHOPIFY_ACCESS_TOKEN").unwrap_or_default(),
            ),
        };

        let defaults = Self::new(required("SHOPIFY_WEBHOOK_SECRET")?);

        let sync_window = Duration::from_secs(parse_or(&get, "SYNC_WINDOW_SECS", 15u64)?);
        if sync_window.is_zero() {
            return Err(ConfigError::Invalid {
                key: "SYNC_WINDOW_SECS",
                reason: "must be greater than zero".into(),
            });
        }

        let lock_attempts = parse_or(&get, "SYNC_LOCK_RETRIES", defaults.lock_attempts)?;
        if lock_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "SYNC_LOCK_RETRIES",
                reason: "must be at least 1".into(),
            });
        }

        let batch_size = parse_or(&get, "SYNC_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "SYNC_BATCH_SIZE",
                reason: "must be at least 1".into(),
            });
        }

        let quantity_tolerance = parse_or(&get, "SYNC_QUANTITY_TOLERANCE", 0i64)?;
        if quantity_tolerance < 0 {
            return Err(ConfigError::Invalid {
                key: "SYNC_QUANTITY_TOLERANCE",
                reason: "must not be negative".into(),
            });
        }

        Ok(Self {
            shop,
            access_token,
            api_version: get("SHOPIFY_API_VERSION").unwrap_or(defaults.api_version.clone()),
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            default_location: parse_opt(&get, "SHOPIFY_LOCATION_ID")?,
            sync_window,
            quantity_tolerance,
            lock_attempts,
            lock_backoff: Duration::from_millis(parse_or(&get, "SYNC_LOCK_BACKOFF_MS", 200u64)?),
            batch_size,
            jitter_max: Duration::from_millis(parse_or(&get, "SYNC_JITTER_MS", 0u64)?),
            deadline: Duration::from_secs(parse_or(&get, "SYNC_DEADLINE_SECS", 4u64)?),
            sweep_interval: Duration::from_secs(parse_or(&get, "SYNC_SWEEP_SECS", 5u64)?.max(1)),
            catalog,
            ..defaults
        })
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        let config = TrackerConfig::default().with_window(self.sync_window);
        if self.quantity_tolerance > 0 {
            let window = config.tolerance_window;
            config.with_quantity_tolerance(self.quantity_tolerance, window)
        } else {
            config
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            lock_attempts: self.lock_attempts,
            lock_backoff: self.lock_backoff,
            jitter_max: self.jitter_max,
            deadline: self.deadline,
            default_location: self.default_location,
        }
    }

    pub fn graphql_config(&self) -> GraphqlCatalogConfig {
        GraphqlCatalogConfig::for_shop(&self.shop, &self.api_version, self.access_token.clone())
            .with_batch_size(self.batch_size)
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("shop", &self.shop)
            .field("access_token", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("port", &self.port)
            .field("default_location", &self.default_location)
            .field("sync_window", &self.sync_window)
            .field("quantity_tolerance", &self.quantity_tolerance)
            .field("lock_attempts", &self.lock_attempts)
            .field("lock_backoff", &self.lock_backoff)
            .field("batch_size", &self.batch_size)
            .field("jitter_max", &self.jitter_max)
            .field("deadline", &self.deadline)
            .field("sweep_interval", &self.sweep_interval)
            .field("catalog", &self.catalog)
            .finish()
    }
}

fn parse_opt<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                reason: format!("'{raw}': {e}"),
            })
        })
        .transpose()
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(get, key)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("SHOPIFY_SHOP", "demo.myshopify.com"),
        ("SHOPIFY_ACCESS_TOKEN", "shpat_x"),
        ("SHOPIFY_WEBHOOK_SECRET", "whsec"),
    ];

    #[test]
    fn defaults_apply_when_optional_values_are_absent() {
        let config = AppConfig::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.catalog, CatalogBackend::Graphql);
        assert_eq!(config.api_version, "2024-10");
        assert_eq!(config.port, 3000);
        assert_eq!(config.sync_window, Duration::from_secs(15));
        assert_eq!(config.lock_attempts, 3);
        assert_eq!(config.lock_backoff, Duration::from_millis(200));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.jitter_max, Duration::ZERO);
        assert_eq!(config.deadline, Duration::from_secs(4));
        assert_eq!(config.default_location, None);
        assert_eq!(
            config.graphql_config().endpoint,
            "https://demo.myshopify.com/admin/api/2024-10/graphql.json"
        );
    }

    #[test]
    fn missing_required_variable_is_named() {
        let err = AppConfig::from_lookup(lookup(&REQUIRED[..2])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("SHOPIFY_WEBHOOK_SECRET"));

        let err = AppConfig::from_lookup(lookup(&[("SHOPIFY_WEBHOOK_SECRET", "s")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("SHOPIFY_SHOP"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SYNC_WINDOW_SECS", "fifteen"));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid { key: "SYNC_WINDOW_SECS", .. })
        ));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SYNC_BATCH_SIZE", "0"));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid { key: "SYNC_BATCH_SIZE", .. })
        ));
    }

    #[test]
    fn overrides_flow_into_tracker_and_settings() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("SYNC_WINDOW_SECS", "20"),
            ("SYNC_LOCK_RETRIES", "5"),
            ("SYNC_JITTER_MS", "150"),
            ("SHOPIFY_LOCATION_ID", "gid://shopify/Location/42"),
            ("SYNC_QUANTITY_TOLERANCE", "1"),
        ]);
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();

        let tracker = config.tracker_config();
        assert_eq!(tracker.window, Duration::from_secs(20));
        assert_eq!(tracker.quantity_tolerance, 1);

        let settings = config.sync_settings();
        assert_eq!(settings.lock_attempts, 5);
        assert_eq!(settings.jitter_max, Duration::from_millis(150));
        assert_eq!(settings.default_location, Some(LocationId::new(42)));
    }

    #[test]
    fn memory_catalog_does_not_need_shop_credentials() {
        let config = AppConfig::from_lookup(lookup(&[
            ("SHOPIFY_WEBHOOK_SECRET", "s"),
            ("STOCKLINK_CATALOG", "memory"),
            ("STOCKLINK_CATALOG_SEED", "seed.json"),
        ]))
        .unwrap();
        assert_eq!(
            config.catalog,
            CatalogBackend::Memory {
                seed: Some(PathBuf::from("seed.json"))
            }
        );
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = AppConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("shpat_x"));
        assert!(!rendered.contains("whsec"));
    }
}

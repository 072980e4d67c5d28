//! Configuration management for Ratewarden.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::clock::Clock;
use crate::error::{Result, WardenError};
use crate::ratelimit::key::{composite, prefixed};
use crate::ratelimit::{
    Admission, BurstLimiter, CounterStore, FailurePolicy, KeySource, RateLimiter, Strategy,
};

/// Environment variable prefix for overrides, e.g. `RATEWARDEN_LIMITER__MAX_REQUESTS`.
pub const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for Ratewarden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// The primary (sustained) limiter
    pub limiter: LimiterSettings,

    /// Optional short-window limiter checked before the primary one
    #[serde(default)]
    pub burst: Option<LimiterSettings>,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreSettings,
}

/// Settings for one rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Name used in logs and as the key namespace
    #[serde(default)]
    pub name: Option<String>,

    /// Throttling algorithm
    #[serde(default)]
    pub strategy: Strategy,

    /// Requests allowed per window
    pub max_requests: u64,

    /// Window length in milliseconds
    pub window_ms: u64,

    /// Components of the partition key
    #[serde(default = "default_key")]
    pub key: Vec<KeySource>,

    /// Routes exempt from limiting
    #[serde(default)]
    pub skip_routes: Vec<String>,

    /// Behavior when the counter store fails
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_key() -> Vec<KeySource> {
    vec![KeySource::Address]
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Interval between sweeps of expired entries, in milliseconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60_000
}

impl StoreSettings {
    /// The sweep interval as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Reject settings the sweeper cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_ms == 0 {
            return Err(WardenError::ConfigInvalid(
                "store.sweep_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl LimiterSettings {
    /// Build a limiter over `store`, namespacing its keys under `default_name`
    /// unless the settings carry their own name.
    pub fn build(
        &self,
        default_name: &str,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<RateLimiter> {
        let name = self.name.clone().unwrap_or_else(|| default_name.to_string());
        let skip_routes = self.skip_routes.clone();

        let mut builder = RateLimiter::builder()
            .name(name.clone())
            .strategy(self.strategy)
            .max_requests(self.max_requests)
            .window(Duration::from_millis(self.window_ms))
            .key_generator(prefixed(name, composite(self.key.clone())))
            .store(store)
            .clock(clock)
            .failure_policy(self.failure_policy);

        if !skip_routes.is_empty() {
            builder = builder.skip_if(move |ctx| skip_routes.iter().any(|r| r == &ctx.route));
        }

        builder.build()
    }
}

impl WardenConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| WardenError::Config(format!("Failed to parse limiter config: {}", e)))
    }

    /// Load configuration from an optional file layered under environment
    /// overrides prefixed with [`ENV_PREFIX`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading limiter configuration");
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| WardenError::Config(e.to_string()))
    }

    /// Build the admission gate described by this configuration.
    ///
    /// With a `burst` section the result is a [`BurstLimiter`]; otherwise a
    /// plain [`RateLimiter`]. Both limiters share `store`. The store settings
    /// are validated here as well.
    pub fn build_gate(
        &self,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Box<dyn Admission>> {
        self.store.validate()?;

        match &self.burst {
            Some(burst) => {
                let burst = burst.build("burst", store.clone(), clock.clone())?;
                let sustained = self.limiter.build("sustained", store, clock)?;
                Ok(Box::new(BurstLimiter::new(burst, sustained)))
            }
            None => Ok(Box::new(self.limiter.build("default", store, clock)?)),
        }
    }
}

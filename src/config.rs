//! Environment-driven configuration

use crate::error::{Result, TnuError};
use crate::id_generator::DEFAULT_POOL_SIZE;
use crate::store::layout::TableLayout;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://tnu_bank.db";
pub const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 5_000;

/// Runtime settings of a usage bank
#[derive(Debug, Clone, PartialEq)]
pub struct TnuConfig {
    /// `sqlite://path`, `sqlite::memory:` or a PostgreSQL URL
    pub database_url: String,

    pub name_string_prefix: String,
    pub taxon_name_prefix: String,
    pub reference_prefix: String,
    pub usage_prefix: String,

    /// Base URLs of pools hosted elsewhere; `None` keeps the pool local
    pub name_string_pool_url: Option<String>,
    pub taxon_name_pool_url: Option<String>,
    pub reference_pool_url: Option<String>,

    pub generator_pool_size: usize,
    pub resolve_timeout: Duration,

    /// Search limit used when the caller gives none; 0 means unlimited
    pub default_limit: usize,
}

impl Default for TnuConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            name_string_prefix: "bbk".to_string(),
            taxon_name_prefix: "txn".to_string(),
            reference_prefix: "rbk".to_string(),
            usage_prefix: "tnu".to_string(),
            name_string_pool_url: None,
            taxon_name_pool_url: None,
            reference_pool_url: None,
            generator_pool_size: DEFAULT_POOL_SIZE,
            resolve_timeout: Duration::from_millis(DEFAULT_RESOLVE_TIMEOUT_MS),
            default_limit: 0,
        }
    }
}

impl TnuConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; unset or blank keys keep their default
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let resolve_timeout_ms = match get("TNU_RESOLVE_TIMEOUT_MS") {
            Some(v) => parse_number::<u64>("TNU_RESOLVE_TIMEOUT_MS", &v)?,
            None => DEFAULT_RESOLVE_TIMEOUT_MS,
        };

        let config = Self {
            database_url: get("TNU_DATABASE_URL").unwrap_or(defaults.database_url),
            name_string_prefix: get("TNU_TABLE_PREFIX_NAME_STRINGS").unwrap_or(defaults.name_string_prefix),
            taxon_name_prefix: get("TNU_TABLE_PREFIX_TAXON_NAMES").unwrap_or(defaults.taxon_name_prefix),
            reference_prefix: get("TNU_TABLE_PREFIX_REFERENCES").unwrap_or(defaults.reference_prefix),
            usage_prefix: get("TNU_TABLE_PREFIX_USAGES").unwrap_or(defaults.usage_prefix),
            name_string_pool_url: get("TNU_NAME_STRING_POOL_URL"),
            taxon_name_pool_url: get("TNU_TAXON_NAME_POOL_URL"),
            reference_pool_url: get("TNU_REFERENCE_POOL_URL"),
            generator_pool_size: match get("TNU_GENERATOR_POOL_SIZE") {
                Some(v) => parse_number("TNU_GENERATOR_POOL_SIZE", &v)?,
                None => defaults.generator_pool_size,
            },
            resolve_timeout: Duration::from_millis(resolve_timeout_ms),
            default_limit: match get("TNU_DEFAULT_LIMIT") {
                Some(v) => parse_number("TNU_DEFAULT_LIMIT", &v)?,
                None => defaults.default_limit,
            },
        };
        config.layout().validate()?;
        Ok(config)
    }

    /// Table names derived from the configured prefixes
    pub fn layout(&self) -> TableLayout {
        TableLayout::new(
            &self.name_string_prefix,
            &self.taxon_name_prefix,
            &self.reference_prefix,
            &self.usage_prefix,
        )
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| TnuError::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

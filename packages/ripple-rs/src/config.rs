//! Store configuration.

use std::env;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;

/// Default buffer size for the commit broadcast channel.
pub const DEFAULT_COMMIT_CAPACITY: usize = 1024;

/// Build environment the store runs in.
///
/// The debug sink is forced off in `Production` and `Test`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(anyhow!("unknown environment \"{other}\"")),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
            Environment::Test => write!(f, "test"),
        }
    }
}

/// Options passed to a store at construction.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Request debug-sink output. See [`StoreOptions::debug_enabled`].
    pub debug: bool,
    pub environment: Environment,
    /// Buffer size of [`crate::Store::commits`]; slow receivers lag past it.
    pub commit_channel_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            debug: true,
            environment: Environment::default(),
            commit_channel_capacity: DEFAULT_COMMIT_CAPACITY,
        }
    }
}

impl StoreOptions {
    /// Load options from environment variables.
    ///
    /// - `RIPPLE_DEBUG`: `true`/`false`, default `true`
    /// - `RIPPLE_ENV`: `development`/`production`/`test`, default `development`
    /// - `RIPPLE_COMMIT_CAPACITY`: positive integer
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = Self::default();
        Ok(Self {
            debug: match env::var("RIPPLE_DEBUG") {
                Ok(raw) => raw
                    .trim()
                    .parse()
                    .context("RIPPLE_DEBUG must be true or false")?,
                Err(_) => defaults.debug,
            },
            environment: match env::var("RIPPLE_ENV") {
                Ok(raw) => raw.parse().context("RIPPLE_ENV is not a known environment")?,
                Err(_) => defaults.environment,
            },
            commit_channel_capacity: match env::var("RIPPLE_COMMIT_CAPACITY") {
                Ok(raw) => raw
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| anyhow!("RIPPLE_COMMIT_CAPACITY must be a positive integer"))?,
                Err(_) => defaults.commit_channel_capacity,
            },
        })
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_commit_channel_capacity(mut self, capacity: usize) -> Self {
        self.commit_channel_capacity = capacity.max(1);
        self
    }

    /// Whether the debug sink receives anything.
    ///
    /// Off in production and test environments and in builds without
    /// `debug_assertions`, whatever `debug` says.
    pub fn debug_enabled(&self) -> bool {
        self.debug
            && cfg!(debug_assertions)
            && !matches!(
                self.environment,
                Environment::Production | Environment::Test
            )
    }
}

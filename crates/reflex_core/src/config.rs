use crate::error::ReflexError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReflexConfig {
    pub instinct: InstinctConfig,
    pub control_loop: ControlLoopConfig,
    pub recorder: RecorderConfig,
}

impl ReflexConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied and the result is validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: ReflexConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Try to load from path; if the file is missing or invalid, return defaults
    /// with env overrides. An override that makes the defaults invalid is dropped.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({:#}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                if let Err(e) = cfg.validate() {
                    tracing::warn!("Ignoring invalid env overrides: {}", e);
                    cfg = Self::default();
                }
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Some(n) = env_u64("REFLEX_INSTINCT_CYCLE_MS") {
            self.instinct.cycle_ms = n;
        }
        if let Some(n) = env_u64("REFLEX_CONTROL_PERIOD_MS") {
            self.control_loop.period_ms = n;
        }
        if let Some(n) = env_u64("REFLEX_RECORDER_FLUSH_BYTES") {
            self.recorder.flush_threshold_bytes = n as usize;
        }
        if let Some(n) = env_u64("REFLEX_RECORDER_FLUSH_MS") {
            self.recorder.flush_interval_ms = n;
        }
    }

    pub fn validate(&self) -> Result<(), ReflexError> {
        self.instinct.validate()?;
        self.control_loop.validate()?;
        self.recorder.validate()
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not an unsigned integer", key, raw);
            None
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstinctConfig {
    /// Polling period of the sequencing worker. Must be positive.
    pub cycle_ms: u64,
}

impl Default for InstinctConfig {
    fn default() -> Self {
        Self { cycle_ms: 20 }
    }
}

impl InstinctConfig {
    pub fn with_cycle(cycle: Duration) -> Result<Self, ReflexError> {
        let cfg = Self {
            cycle_ms: cycle.as_millis() as u64,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn cycle(&self) -> Duration {
        Duration::from_millis(self.cycle_ms)
    }

    pub fn validate(&self) -> Result<(), ReflexError> {
        if self.cycle_ms == 0 {
            return Err(ReflexError::invalid("instinct cycle_ms must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlLoopConfig {
    pub period_ms: u64,
    /// Recent-failure score above which low-priority periodic work is skipped.
    pub failure_threshold: u32,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            period_ms: 20,
            failure_threshold: 10,
        }
    }
}

impl ControlLoopConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn validate(&self) -> Result<(), ReflexError> {
        if self.period_ms == 0 {
            return Err(ReflexError::invalid("control_loop period_ms must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Soft threshold at which the encoder pushes buffered bytes to its sink.
    pub flush_threshold_bytes: usize,
    /// Upper bound on how long the writer thread stays idle before flushing.
    pub flush_interval_ms: u64,
    /// Number of record buffers kept for reuse.
    pub pool_capacity: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            flush_threshold_bytes: 10 * 1024,
            flush_interval_ms: 1000,
            pool_capacity: 128,
        }
    }
}

impl RecorderConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ReflexError> {
        if self.flush_threshold_bytes == 0 {
            return Err(ReflexError::invalid("recorder flush_threshold_bytes must be positive"));
        }
        if self.flush_interval_ms == 0 {
            return Err(ReflexError::invalid("recorder flush_interval_ms must be positive"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Orchestrator configuration.
//!
//! Defaults are usable as-is. [`OrchestratorConfig::load`] reads the `[orchestrator]` table of
//! `$XDG_CONFIG_HOME/gauntlet/config.toml`, then applies `GAUNTLET_*` environment overrides
//! (after `.env` / `[env]` have been applied with env > .env > XDG priority).
//!
//! ```toml
//! [orchestrator]
//! iteration_cap = 3
//! max_retries = 2
//!
//! [orchestrator.gates]
//! source_quality = 0.75
//!
//! [orchestrator.dedup]
//! source_key = "normalized_url"
//! ```

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::RetryPolicy;
use crate::gate::{GateThresholds, DEFAULT_COMPLETENESS_TOLERANCE, DEFAULT_ITERATION_CAP};
use crate::merge::SourceKey;
use crate::state::ReviewPoints;

pub const APP_NAME: &str = "gauntlet";
const SECTION: &str = "orchestrator";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub source_key: SourceKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Loop-backs allowed per phase before gates force advancement.
    pub iteration_cap: u32,
    /// Minimum completeness gain between gap-analysis iterations.
    pub completeness_tolerance: f64,
    pub gates: GateThresholds,
    /// Retries per branch for transient errors (attempts = retries + 1).
    pub max_retries: usize,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub retry_multiplier: f64,
    /// Per-invocation timeout; an expired invocation counts as transient.
    pub capability_timeout_secs: u64,
    /// Phase ceiling; gates force advancement once exceeded.
    pub phase_timeout_secs: u64,
    /// How long cancellation waits for in-flight branches to stop.
    pub cancel_grace_ms: u64,
    /// Node executions allowed per run.
    pub max_steps: u64,
    /// Pause for human review after topic decomposition.
    pub review_plan: bool,
    /// Pause for human review before finishing.
    pub final_review: bool,
    pub dedup: DedupConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            iteration_cap: DEFAULT_ITERATION_CAP,
            completeness_tolerance: DEFAULT_COMPLETENESS_TOLERANCE,
            gates: GateThresholds::default(),
            max_retries: 2,
            retry_initial_ms: 200,
            retry_max_ms: 5_000,
            retry_multiplier: 2.0,
            capability_timeout_secs: 360,
            phase_timeout_secs: 3_600,
            cancel_grace_ms: 2_000,
            max_steps: 50,
            review_plan: false,
            final_review: false,
            dedup: DedupConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] env_config::LoadError),
    #[error("{key}: cannot parse {value:?}")]
    InvalidEnv { key: String, value: String },
}

impl OrchestratorConfig {
    /// Env/.env/XDG overlay, then the `[orchestrator]` table, then `GAUNTLET_*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        env_config::load_and_apply(APP_NAME, None)?;
        let mut config: Self = env_config::load_section(APP_NAME, SECTION)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        tracing::debug!(?config, "orchestrator config loaded");
        Ok(config)
    }

    /// Applies `GAUNTLET_<FIELD>` overrides read through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        override_with(&lookup, "GAUNTLET_ITERATION_CAP", &mut self.iteration_cap)?;
        override_with(
            &lookup,
            "GAUNTLET_COMPLETENESS_TOLERANCE",
            &mut self.completeness_tolerance,
        )?;
        override_with(
            &lookup,
            "GAUNTLET_SOURCE_QUALITY_THRESHOLD",
            &mut self.gates.source_quality,
        )?;
        override_with(&lookup, "GAUNTLET_COHERENCE_THRESHOLD", &mut self.gates.coherence)?;
        override_with(&lookup, "GAUNTLET_MAX_RETRIES", &mut self.max_retries)?;
        override_with(
            &lookup,
            "GAUNTLET_CAPABILITY_TIMEOUT_SECS",
            &mut self.capability_timeout_secs,
        )?;
        override_with(&lookup, "GAUNTLET_PHASE_TIMEOUT_SECS", &mut self.phase_timeout_secs)?;
        override_with(&lookup, "GAUNTLET_MAX_STEPS", &mut self.max_steps)?;
        override_with(&lookup, "GAUNTLET_REVIEW_PLAN", &mut self.review_plan)?;
        override_with(&lookup, "GAUNTLET_FINAL_REVIEW", &mut self.final_review)?;
        if let Some(value) = lookup("GAUNTLET_SOURCE_KEY") {
            self.dedup.source_key = match value.as_str() {
                "normalized_url" => SourceKey::NormalizedUrl,
                "id" => SourceKey::Id,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "GAUNTLET_SOURCE_KEY".into(),
                        value,
                    })
                }
            };
        }
        Ok(())
    }

    pub fn review_points(&self) -> ReviewPoints {
        ReviewPoints {
            review_plan: self.review_plan,
            final_review: self.final_review,
        }
    }

    /// Same config with the review nodes a stored run was started with.
    pub fn with_review_points(mut self, reviews: ReviewPoints) -> Self {
        self.review_plan = reviews.review_plan;
        self.final_review = reviews.final_review;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        if self.max_retries == 0 {
            return RetryPolicy::None;
        }
        RetryPolicy::exponential(
            self.max_retries,
            Duration::from_millis(self.retry_initial_ms),
            Duration::from_millis(self.retry_max_ms),
            self.retry_multiplier,
        )
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

fn override_with<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(key) {
        *slot = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = OrchestratorConfig::default();
        assert_eq!(c.iteration_cap, 3);
        assert_eq!(c.completeness_tolerance, 0.05);
        assert_eq!(c.gates.source_quality, 0.7);
        assert_eq!(c.max_steps, 50);
        assert_eq!(c.dedup.source_key, SourceKey::NormalizedUrl);
        assert_eq!(c.retry_policy().max_attempts(), 2);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let c: OrchestratorConfig = toml::from_str(
            "iteration_cap = 5\n[gates]\ncoherence = 0.9\n[dedup]\nsource_key = \"id\"\n",
        )
        .unwrap();
        assert_eq!(c.iteration_cap, 5);
        assert_eq!(c.gates.coherence, 0.9);
        assert_eq!(c.gates.source_quality, 0.7);
        assert_eq!(c.dedup.source_key, SourceKey::Id);
        assert_eq!(c.max_retries, 2);
    }

    #[test]
    fn env_overrides_apply_and_reject_garbage() {
        let mut c = OrchestratorConfig::default();
        c.apply_env(env(&[
            ("GAUNTLET_MAX_STEPS", "80"),
            ("GAUNTLET_REVIEW_PLAN", "true"),
            ("GAUNTLET_SOURCE_KEY", "id"),
        ]))
        .unwrap();
        assert_eq!(c.max_steps, 80);
        assert!(c.review_plan);
        assert_eq!(c.dedup.source_key, SourceKey::Id);

        let err = c
            .apply_env(env(&[("GAUNTLET_ITERATION_CAP", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn zero_retries_disables_retry() {
        let c = OrchestratorConfig {
            max_retries: 0,
            ..OrchestratorConfig::default()
        };
        assert!(!c.retry_policy().should_retry(0));
    }
}

/// Engine configuration — generation policy, filter modules, display
/// styling and reveal pacing, loaded from RON.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::schema::sampling::SamplingParameters;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration. Every section and field falls back to its
/// default when missing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ai: AiConfig,
    pub modules: ModulesConfig,
    pub display: DisplayConfig,
    pub reveal: RevealConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Seconds allowed for one whole generation; zero or less means no limit.
    pub timeout_secs: f64,
    pub generation_length: usize,
    pub batch_size: usize,
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub seed: Option<u64>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20.0,
            generation_length: 60,
            batch_size: 1,
            temperature: 0.8,
            top_k: 40,
            top_p: 0.9,
            repetition_penalty: 1.1,
            seed: None,
        }
    }
}

impl AiConfig {
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs > 0.0 && self.timeout_secs.is_finite() {
            Some(Duration::from_secs_f64(self.timeout_secs))
        } else {
            None
        }
    }

    pub fn sampling(&self) -> SamplingParameters {
        SamplingParameters {
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            repetition_penalty: self.repetition_penalty,
        }
    }
}

/// Which filter modules feed each extension point, as `domain:module` ids
/// in registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    #[serde(deserialize_with = "module_list")]
    pub input_filters: Vec<String>,
    #[serde(deserialize_with = "module_list")]
    pub output_filters: Vec<String>,
    pub display_filter: String,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            input_filters: vec!["adventure:standard".to_string()],
            output_filters: vec!["adventure:standard".to_string()],
            display_filter: "adventure:standard".to_string(),
        }
    }
}

/// Accept either a list of ids or one string, which may itself be
/// comma-separated.
fn module_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(list) => vec![list],
        OneOrMany::Many(ids) => ids,
    })
}

/// Optional tag bodies wrapped around action and result entries, e.g.
/// `"i"` or `"color=88aaff"`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub action_style: Option<String>,
    pub result_style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealConfig {
    pub step_delay_ms: u64,
    /// Growth in characters above which a new display is shown at once.
    pub max_animated_growth: usize,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: 25,
            max_animated_growth: 800,
        }
    }
}

impl RevealConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

impl EngineConfig {
    pub fn load_from_ron(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = ron::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ai = &self.ai;
        if !(0.0..=1.0).contains(&ai.top_p) {
            return Err(ConfigError::Invalid(format!(
                "top_p must be within [0, 1], got {}",
                ai.top_p
            )));
        }
        if ai.repetition_penalty < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "repetition_penalty must be at least 1, got {}",
                ai.repetition_penalty
            )));
        }
        if ai.generation_length == 0 {
            return Err(ConfigError::Invalid(
                "generation_length must be positive".to_string(),
            ));
        }
        if ai.temperature.is_nan() {
            return Err(ConfigError::Invalid("temperature is NaN".to_string()));
        }
        Ok(())
    }

    pub fn sampling(&self) -> SamplingParameters {
        self.ai.sampling()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.ai.generation_length, 60);
        assert_eq!(config.ai.top_k, 40);
        assert_eq!(config.ai.timeout(), Some(Duration::from_secs(20)));
        assert_eq!(config.reveal.max_animated_growth, 800);
        assert_eq!(config.reveal.step_delay(), Duration::from_millis(25));
        assert_eq!(config.modules.display_filter, "adventure:standard");
    }

    #[test]
    fn partial_ron_fills_defaults() {
        let config = EngineConfig::parse_ron(
            r#"(
                ai: (temperature: 1.0, top_k: 0, timeout_secs: 0.0),
                modules: (input_filters: ["adventure:transcript"]),
            )"#,
        )
        .unwrap();
        assert_eq!(config.ai.temperature, 1.0);
        assert_eq!(config.ai.top_k, 0);
        assert_eq!(config.ai.top_p, 0.9);
        assert_eq!(config.ai.timeout(), None);
        assert_eq!(config.modules.input_filters, vec!["adventure:transcript"]);
        assert_eq!(config.modules.output_filters, vec!["adventure:standard"]);
    }

    #[test]
    fn module_list_accepts_single_string() {
        let config = EngineConfig::parse_ron(
            r#"(modules: (output_filters: "adventure:standard, adventure:transcript"))"#,
        )
        .unwrap();
        assert_eq!(
            config.modules.output_filters,
            vec!["adventure:standard, adventure:transcript"]
        );
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(matches!(
            EngineConfig::parse_ron("(ai: (top_p: 1.5))"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::parse_ron("(ai: (repetition_penalty: 0.5))"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::parse_ron("(ai: (generation_length: 0))"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn malformed_ron_is_an_error() {
        assert!(matches!(
            EngineConfig::parse_ron("(ai: ("),
            Err(ConfigError::Ron(_))
        ));
    }

    #[test]
    fn sampling_reflects_ai_section() {
        let mut config = EngineConfig::default();
        config.ai.top_p = 1.0;
        let params = config.sampling();
        assert_eq!(params.top_p, 1.0);
        assert_eq!(params.repetition_penalty, 1.1);
    }

    #[test]
    fn ron_round_trip() {
        let mut config = EngineConfig::default();
        config.display.action_style = Some("i".to_string());
        let serialized = ron::to_string(&config).unwrap();
        let deserialized = EngineConfig::parse_ron(&serialized).unwrap();
        assert_eq!(deserialized, config);
    }
}

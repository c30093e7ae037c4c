use crate::{error::Result, PipelineError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Options forwarded verbatim to every step of a run.
///
/// The pipeline never interprets these beyond [`validate`](Self::validate);
/// unset fields fall back to the step's or provider's own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Model name override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Temperature (0.0 = deterministic, 2.0 = very creative).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Nucleus sampling cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Provider-specific options, merged into the request as-is.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ModelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Layer `self` over `base`: fields set on `self` win, `extra` maps merge.
    pub fn overlay(&self, base: &ModelOptions) -> ModelOptions {
        let mut extra = base.extra.clone();
        for (k, v) in &self.extra {
            extra.insert(k.clone(), v.clone());
        }
        ModelOptions {
            model: self.model.clone().or_else(|| base.model.clone()),
            temperature: self.temperature.or(base.temperature),
            max_tokens: self.max_tokens.or(base.max_tokens),
            top_p: self.top_p.or(base.top_p),
            extra,
        }
    }

    /// Reject values no provider would accept.
    pub fn validate(&self) -> Result<()> {
        if let Some(model) = &self.model {
            if model.trim().is_empty() {
                return Err(PipelineError::InvalidConfig(
                    "model name must not be blank".to_string(),
                ));
            }
        }
        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(PipelineError::InvalidConfig(format!(
                    "temperature must be within [0, 2], got {}",
                    temp
                )));
            }
        }
        if let Some(top_p) = self.top_p {
            if !(top_p > 0.0 && top_p <= 1.0) {
                return Err(PipelineError::InvalidConfig(format!(
                    "top_p must be within (0, 1], got {}",
                    top_p
                )));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

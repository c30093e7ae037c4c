use crate::{
    context::RunContext,
    error::Result,
    options::ModelOptions,
    prompt::{render, TemplateVars},
    step::Step,
    types::{Generation, Message, Prompt},
    PipelineError,
};
use async_trait::async_trait;
use std::sync::Arc;

/// A fully resolved request for a model provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub options: ModelOptions,
}

/// Messages produced by a provider for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub messages: Vec<Message>,
}

/// Boundary to a remote model service.
///
/// Implementations translate [`ModelRequest`] into a vendor API call and
/// map the reply back to messages. See [`OllamaProvider`](crate::OllamaProvider).
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse>;

    /// Model used when neither the agent nor the call options name one.
    fn default_model(&self) -> Option<&str> {
        None
    }
}

/// A single model call with fixed instructions.
///
/// The rendered instructions are sent as a system message ahead of the
/// incoming conversation. The generation holds only the provider's reply,
/// so the next step in a pipeline sees this agent's answer and nothing older.
pub struct Agent {
    name: String,
    instructions: Option<String>,
    options: ModelOptions,
    vars: TemplateVars,
    provider: Arc<dyn ModelProvider>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("instructions", &self.instructions)
            .field("options", &self.options)
            .finish()
    }
}

impl Agent {
    pub fn new(name: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            name: name.into(),
            instructions: None,
            options: ModelOptions::default(),
            vars: TemplateVars::default(),
            provider,
        }
    }

    /// Instruction template; `{key}` placeholders are filled from [`with_var`](Self::with_var).
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    /// Defaults for this agent. Options passed to a run take precedence.
    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.set(key, value);
        self
    }

    /// Build the provider request for `prompt` without sending it.
    pub fn request_for(&self, prompt: &Prompt, options: &ModelOptions) -> Result<ModelRequest> {
        let options = options.overlay(&self.options);
        let model = options
            .model
            .clone()
            .or_else(|| self.provider.default_model().map(str::to_string))
            .ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "agent '{}' has no model configured",
                    self.name
                ))
            })?;

        let mut messages = Vec::with_capacity(prompt.messages().len() + 1);
        if let Some(template) = &self.instructions {
            let system = render(template, &self.vars);
            if !system.trim().is_empty() {
                messages.push(Message::system(system));
            }
        }
        messages.extend_from_slice(prompt.messages());

        Ok(ModelRequest {
            model,
            messages,
            options,
        })
    }
}

#[async_trait]
impl Step for Agent {
    async fn run(
        &self,
        ctx: &RunContext,
        prompt: &Prompt,
        options: &ModelOptions,
    ) -> Result<Generation> {
        let request = self.request_for(prompt, options)?;
        ctx.check()?;

        let response = tokio::select! {
            response = self.provider.generate(&request) => response?,
            _ = ctx.cancelled() => return Err(ctx.interruption()),
        };

        if response.messages.is_empty() {
            return Err(PipelineError::EmptyResponse);
        }
        Ok(Generation::new(response.messages))
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        requests: Mutex<Vec<ModelRequest>>,
        reply: Option<String>,
    }

    #[async_trait]
    impl ModelProvider for RecordingProvider {
        async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(ModelResponse {
                messages: self
                    .reply
                    .iter()
                    .map(|text| Message::assistant(text.clone()))
                    .collect(),
            })
        }

        fn default_model(&self) -> Option<&str> {
            Some("fallback-model")
        }
    }

    struct StalledProvider;

    #[async_trait]
    impl ModelProvider for StalledProvider {
        async fn generate(&self, _request: &ModelRequest) -> Result<ModelResponse> {
            std::future::pending().await
        }
    }

    fn replying(text: &str) -> Arc<RecordingProvider> {
        Arc::new(RecordingProvider {
            requests: Mutex::new(Vec::new()),
            reply: Some(text.to_string()),
        })
    }

    #[tokio::test]
    async fn test_agent_prepends_rendered_instructions() {
        let provider = replying("ok");
        let agent = Agent::new("writer", provider.clone())
            .with_model("llama3")
            .with_instructions("Write in {language}.")
            .with_var("language", "French");

        let out = agent
            .run(
                &RunContext::new(),
                &Prompt::from_text("a poem"),
                &ModelOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.text(), "ok");
        assert_eq!(out.messages.len(), 1);

        let requests = provider.requests.lock().unwrap();
        let req = &requests[0];
        assert_eq!(req.model, "llama3");
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[0].text(), "Write in French.");
        assert_eq!(req.messages[1].text(), "a poem");
    }

    #[test]
    fn test_call_options_override_agent_defaults() {
        let agent = Agent::new("a", replying("x"))
            .with_options(ModelOptions::new().with_model("agent-model").with_temperature(0.9));
        let req = agent
            .request_for(
                &Prompt::from_text("hi"),
                &ModelOptions::new().with_temperature(0.2),
            )
            .unwrap();
        assert_eq!(req.model, "agent-model");
        assert_eq!(req.options.temperature, Some(0.2));
    }

    #[test]
    fn test_provider_default_model_used_last() {
        let agent = Agent::new("a", replying("x"));
        let req = agent
            .request_for(&Prompt::from_text("hi"), &ModelOptions::default())
            .unwrap();
        assert_eq!(req.model, "fallback-model");
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn test_missing_model_is_config_error() {
        let agent = Agent::new("lonely", Arc::new(StalledProvider));
        match agent.request_for(&Prompt::from_text("hi"), &ModelOptions::default()) {
            Err(PipelineError::InvalidConfig(msg)) => assert!(msg.contains("lonely")),
            _ => panic!("Expected InvalidConfig error"),
        }
    }

    #[tokio::test]
    async fn test_empty_provider_reply_fails() {
        let provider = Arc::new(RecordingProvider::default());
        let agent = Agent::new("a", provider).with_model("m");
        let result = agent
            .run(&RunContext::new(), &Prompt::from_text("hi"), &ModelOptions::default())
            .await;
        assert!(matches!(result, Err(PipelineError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_agent_honors_cancellation_during_call() {
        let agent = Agent::new("slow", Arc::new(StalledProvider)).with_model("m");
        let ctx = RunContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            canceller.cancel();
        });

        let result = agent
            .run(&ctx, &Prompt::from_text("hi"), &ModelOptions::default())
            .await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn test_agent_introspection() {
        let agent = Agent::new("critic", Arc::new(StalledProvider))
            .with_instructions("Judge the {thing}.");
        assert_eq!(agent.name(), Some("critic"));
        assert_eq!(agent.instructions(), Some("Judge the {thing}."));
    }
}

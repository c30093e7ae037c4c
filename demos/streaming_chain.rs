//! Streams each agent's answer as soon as it is ready. Press ctrl-c to stop
//! the chain before the next step starts.
//!
//! ```text
//! OLLAMA_MODEL=llama3.2 cargo run --example streaming_chain -- "rust ownership"
//! ```

use futures::StreamExt;
use llm_chain::{
    Agent, ModelOptions, OllamaConfig, OllamaProvider, Pipeline, PipelineError, Prompt, RunContext,
    TracingObserver,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let topic = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "the history of the printing press".to_string());

    let provider = Arc::new(OllamaProvider::new(OllamaConfig::from_dotenv()?));
    let pipeline = Pipeline::builder()
        .add_step(Agent::new("analyzer", provider.clone()).with_instructions(
            "Analyze the topic and list its key facts and open questions.",
        ))
        .add_step(Agent::new("summarizer", provider.clone()).with_instructions(
            "Summarize the analysis in one paragraph.",
        ))
        .add_step(
            Agent::new("enhancer", provider)
                .with_instructions("Rewrite the summary for a {audience} audience.")
                .with_var("audience", "high school"),
        )
        .with_observer(TracingObserver)
        .build();

    let ctx = RunContext::new().with_timeout(Duration::from_secs(600));
    let stopper = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.cancel();
        }
    });

    let mut stream = pipeline.run_stream(&ctx, Prompt::from_text(topic), &ModelOptions::default());
    let mut step = 0;
    while let Some(item) = stream.next().await {
        match item {
            Ok(generation) => {
                step += 1;
                println!("--- step {} ---\n{}\n", step, generation.text());
            }
            Err(e) if e.is_cancellation() => {
                println!("stopped after {} step(s): {}", step, e);
                return Ok(());
            }
            Err(PipelineError::Provider(msg)) => anyhow::bail!("model call failed: {}", msg),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

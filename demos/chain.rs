//! Three Ollama agents turn a one-line idea into a short story, printing a
//! colored transcript of every step.
//!
//! ```text
//! OLLAMA_MODEL=llama3.2 cargo run --example chain
//! ```
//!
//! `OLLAMA_*` settings may also come from a `.env` file in the working
//! directory.

use llm_chain::{Agent, ModelOptions, OllamaConfig, OllamaProvider, Pipeline, Prompt, RunContext};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_chain=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = OllamaConfig::from_dotenv()?;
    if config.default_model.is_none() {
        anyhow::bail!("set OLLAMA_MODEL to the model you want to run");
    }
    let provider = Arc::new(OllamaProvider::new(config));

    let outline = Agent::new("story_outline_agent", provider.clone()).with_instructions(
        "Generate a very short story outline based on the user's input. Keep it concise and clear.",
    );
    let enhancer = Agent::new("story_enhancer_agent", provider.clone()).with_instructions(
        "Take the story outline provided and enhance it with more details, character development, and plot points.",
    );
    let writer = Agent::new("story_writer_agent", provider)
        .with_instructions(
            "Write a short story based on the enhanced outline. Follow its structure and keep it under {words} words.",
        )
        .with_var("words", "400");

    let pipeline = Pipeline::builder()
        .add_step(outline)
        .add_step(enhancer)
        .add_step(writer)
        .verbose(true)
        .build();

    let prompt = Prompt::from_text("A brave knight embarks on a quest to find a hidden treasure.");
    let options = ModelOptions::new().with_temperature(0.7);

    let story = pipeline.run(&RunContext::new(), prompt, &options).await?;
    tracing::info!(chars = story.text().len(), "story written");
    Ok(())
}

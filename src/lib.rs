//! # LLM Chain
//!
//! Sequential LLM step pipelines with blocking and streaming execution,
//! cooperative cancellation, and pluggable progress observers.
//!
//! A [`Pipeline`] runs its steps strictly in order. Each step receives a
//! prompt built only from the previous step's generation, so an agent sees
//! exactly one upstream answer and nothing older.
//!
//! ## Features
//!
//! - **Composable steps**: anything implementing [`Step`]: model calls
//!   ([`Agent`]), closures ([`step_fn`], [`map_text`]) or whole pipelines
//! - **Two run modes**: [`Pipeline::run`] returns the final generation,
//!   [`Pipeline::run_stream`] yields every intermediate one as it completes
//! - **Cancellation**: [`RunContext`] carries a cancellation token and an
//!   optional deadline; both are checked before every step
//! - **Observers**: [`ConsoleObserver`] prints a colored transcript,
//!   [`TracingObserver`] reports through `tracing`
//! - **Ollama**: [`OllamaProvider`] talks to `/api/chat` and strips
//!   `<think>` reasoning blocks
//!
//! ## Quick Start
//!
//! ```no_run
//! use llm_chain::{Agent, ModelOptions, OllamaConfig, OllamaProvider, Pipeline, Prompt, RunContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Arc::new(OllamaProvider::new(
//!         OllamaConfig::default().with_default_model("llama3.2"),
//!     ));
//!
//!     let pipeline = Pipeline::builder()
//!         .add_step(Agent::new("outline", provider.clone())
//!             .with_instructions("Write a three-point outline for the topic."))
//!         .add_step(Agent::new("writer", provider)
//!             .with_instructions("Turn the outline into a short paragraph."))
//!         .verbose(true)
//!         .build();
//!
//!     let result = pipeline
//!         .run(&RunContext::new(), Prompt::from_text("tide pools"), &ModelOptions::default())
//!         .await?;
//!
//!     println!("{}", result.text());
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod client;
pub mod console;
pub mod context;
pub mod error;
pub mod observer;
pub mod options;
pub mod pipeline;
pub mod prompt;
pub mod step;
pub mod stream;
pub mod types;

pub use agent::{Agent, ModelProvider, ModelRequest, ModelResponse};
pub use client::{OllamaConfig, OllamaProvider};
pub use console::ConsoleObserver;
pub use context::RunContext;
pub use error::{PipelineError, Result};
pub use observer::{PipelineObserver, TracingObserver};
pub use options::ModelOptions;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use prompt::TemplateVars;
pub use step::{map_text, step_fn, FnStep, Labeled, MapText, Step, StepExt, StepInfo};
pub use stream::GenerationStream;
pub use types::{Generation, Message, Part, Prompt, Role};

pub mod compiler;
pub mod config;
pub mod error;
pub mod formatter;
pub mod gateway;
pub mod intent;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod schema;

pub use compiler::{CompiledQuery, QueryCompiler};
pub use config::AssistantConfig;
pub use error::{AssistantError, Result};
pub use gateway::Sample;
pub use intent::{Aggregation, Intent, TimeRange};
pub use orchestrator::MetricsAssistant;
pub use schema::{MetricSpec, SchemaStore, Unit};

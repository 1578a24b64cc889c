pub mod admin;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod environment;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod store;
pub mod sysstat;
pub mod utils;
pub mod workload;

#[cfg(test)]
mod testing;

pub use config::Opts;
pub use dataset::VectorDataset;
pub use error::{BenchError, Result};
pub use loader::BulkLoader;
pub use metrics::MetricsCollector;
pub use orchestrator::ExperimentOrchestrator;
pub use store::VectorStore;

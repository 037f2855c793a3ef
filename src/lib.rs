pub mod config;
pub mod eia;
pub mod error;
pub mod pipeline;
pub mod warehouse;

pub use config::PipelineConfig;
pub use error::EtlError;
pub use pipeline::{PipelineRunner, RunState, RunSummary};

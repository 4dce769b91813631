pub mod cache;
pub mod config;
pub mod orchestrator;
pub mod sinks;
pub mod translate;
pub mod util;

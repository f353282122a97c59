pub mod orchestrator;
pub mod pipeline;
pub mod storage;

pub use orchestrator::Engine;

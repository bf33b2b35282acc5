pub mod adapters;
pub mod baseline;
pub mod config;
pub mod drift;
pub mod embeddings;
pub mod engine;
pub mod errors;
pub mod harness;
pub mod model;
pub mod normalize;
pub mod scoring;
pub mod storage;
pub mod trace;
pub mod transport;

pub use baseline::BaselineRef;
pub use config::Settings;
pub use errors::EngineError;
pub use harness::Harness;
pub use storage::Store;

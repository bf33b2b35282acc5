pub mod client;
pub mod util;

pub use client::EmbeddingClient;

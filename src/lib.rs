pub mod config;
pub mod fetcher;
pub mod normalizer;
pub mod pipeline;
pub mod provider;
pub mod queue;
pub mod server;
pub mod snapshot;
pub mod storage;
pub mod telemetry;

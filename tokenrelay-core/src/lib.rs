pub mod adapter;
pub mod client;
pub mod config;
pub mod error;
pub mod http_client;
pub mod model;
pub mod normalizer;
pub mod provider;
pub mod provider_factory;
pub mod providers;
pub mod server;
pub mod sse;
pub mod stream;
pub mod telemetry;
#[cfg(test)]
pub mod test_util;

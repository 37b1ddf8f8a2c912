pub mod actuation;
pub mod api;
pub mod config;
pub mod error;
pub mod inference;
pub mod ingest;
pub mod realtime;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testing;

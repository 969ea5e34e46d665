//! Library root for `movesmart-backend`.
//!
//! MoveSmart is a traffic-monitoring backend for Kenyan cities designed to:
//! - Expose REST endpoints for users, incidents, traffic data, and reports
//! - Enforce role-based access control over a static permission table
//! - Proxy the TomTom traffic, search, and routing APIs
//! - Generate AI traffic reports via OpenRouter/OpenAI with an offline fallback
//! - Periodically collect live incident and flow data for model training
//!
//! The backend integrates with SurrealDB for storage and an OpenAI-compatible
//! API for analysis. The architecture is built around extensible traits that
//! allow for different implementations of each service.

pub mod api;
pub mod auth;
pub mod base;
pub mod collector;
pub mod geo;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Void};
use tracing::info;

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the backend runtime:
/// - Creates the runtime context with database, traffic, and LLM clients
/// - Starts the background collectors
/// - Serves the REST API until shutdown
pub async fn start(config: Config) -> Void {
    info!("Starting movesmart-backend ...");

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}

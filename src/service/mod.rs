//! Service integrations for external APIs and clients.
//!
//! This module contains implementations for the services used by the backend:
//! - Database services (e.g., SurrealDB)
//! - Traffic data services (e.g., TomTom)
//! - LLM services (e.g., OpenRouter/OpenAI, plus a heuristic fallback)
//!
//! Each service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod db;
pub mod llm;
pub mod traffic;

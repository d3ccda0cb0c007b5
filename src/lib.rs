//! Grounded business-document generation
//!
//! Turns a free-text prompt into a cited business document:
//! - Plans sections and context needs with deterministic rules
//! - Gathers retrieved passages, web results and a computed financial model concurrently
//! - Makes one model call with bounded citation markers
//! - Validates citations, figures and safety before returning
//! - Records usage and results without blocking the caller
//!
//! PIPELINE:
//! REQUEST → PLAN → PREPARE → ASSEMBLE → MODEL_CALL → PARSE → VALIDATE → RESPOND

pub mod agent;
pub mod api;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod execution;
pub mod finance;
pub mod llm;
pub mod models;
pub mod planner;
pub mod retrieval;
pub mod state;
pub mod tools;
pub mod verification;
pub mod web_search;

pub use error::{GenerationError, Result};

// Re-export common types
pub use agent::Orchestrator;
pub use classifier::AssistantTypeClassifier;
pub use execution::Executor;
pub use models::*;

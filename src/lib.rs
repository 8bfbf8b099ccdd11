//! Math tutoring agent: guardrailed routing over a vector knowledge base,
//! with web-search fallback and a human feedback loop.

pub mod agents;
pub mod api;
pub mod config;
pub mod database;
pub mod dataset;
pub mod embeddings;
pub mod error;
pub mod feedback;
pub mod gateway;
pub mod guardrails;
pub mod knowledge_base;
pub mod llm;
pub mod server;
pub mod services;

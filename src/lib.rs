//! pyrefactor - LLM-assisted analysis and refactoring of Python code.
//!
//! Local analysis (structure, metrics, design patterns, performance,
//! documentation, web API design and API security) runs on tree-sitter; an LLM adds
//! free-form analysis, refactoring suggestions and rewritten code.

pub mod api;
pub mod changes;
pub mod config;
pub mod docs;
pub mod engine;
pub mod interact;
pub mod llm;
pub mod metrics;
pub mod parser;
pub mod patterns;
pub mod perf;
pub mod registry;
pub mod reporter;
pub mod scanner;
pub mod security;
pub mod suggestions;

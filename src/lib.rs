//! Workflow orchestration core for a multi-phase brand generation pipeline.
//!
//! - [`phase`]: the fixed phase sequence and its adjacency graph
//! - [`requirements`]: artifacts needed to finish or start a phase
//! - [`gates`]: scored quality gates and quality standards
//! - [`recovery`]: failure classification, recovery and escalation
//! - [`orchestrator`]: the workflow manager tying the above together
//! - [`session`]: the per-project key/value store everything reads and writes

pub mod config;
pub mod errors;
pub mod gates;
pub mod orchestrator;
pub mod phase;
pub mod recovery;
pub mod requirements;
pub mod session;

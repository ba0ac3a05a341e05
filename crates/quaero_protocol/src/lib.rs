//! Shared data model, configuration, and trait contracts for the
//! job-orchestration core. Every other crate in the workspace depends
//! on this one; it has no dependency on any of them.

pub mod config;
pub mod defaults;
pub mod error;
pub mod store;
pub mod types;
pub mod worker;

pub use error::{ProtocolError, Result};
pub use types::{
    step_job_id, AuditLogEntry, AuditOperation, ChatMessage, ChildJobStats, ConfigLookup,
    ConfigMap, ConfigValue, ContentRequest, ContentResponse, Document, DocumentId, JobDefinition,
    JobId, JobKind, JobStatus, JobStep, Provider, QueueJob, Role, StepId, ThinkingLevel,
    ValidationResult, WorkStrategy, WorkerInitResult, WorkerType,
};
pub use worker::Worker;

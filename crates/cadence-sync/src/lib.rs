//! # cadence-sync
//!
//! The synchronization engine at the core of Cadence: incremental
//! bi-directional reconciliation of tracker data with conflict detection
//! and resolution, high-throughput webhook ingestion with deduplication
//! and per-resource ordering, and a versioned field-mapping layer that
//! normalizes heterogeneous external schemas.
//!
//! ## Components
//!
//! - [`planner`]: change detection and incremental sync planning
//! - [`conflict`]: divergence classification and resolution strategies
//! - [`mapping`]: the pure field mapping engine with versioned sets
//! - [`ingest`]: webhook pipeline (signatures, dedup, bounded queues)
//! - [`engine`]: the reconciliation pipeline tying it all together
//! - [`worker`]: the tokio worker pool draining the ingest queues
//! - [`poller`]: the scheduled polling loop backstopping webhooks
//! - [`store`]: the durable sync state store
//!
//! ## Data flow
//!
//! ```text
//! webhooks ─┐
//!           ├─> ingest ─> planner ─> conflict ─> mapping ─> canonical store
//! polling ──┘                                                │
//!                                                            ▼
//!                                                     sync state store
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod conflict;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod mapping;
pub mod metrics;
pub mod planner;
pub mod poller;
pub mod state;
pub mod store;
pub mod worker;

pub use conflict::{Divergence, StrategyConfig, StrategyDecision};
pub use engine::{EngineConfig, SyncCompletionListener, SyncEngine, SyncOutcome, SyncResult};
pub use error::{Result, SyncError};
pub use ingest::{
    DedupIndex, EventProcessor, IngestConfig, IngestPipeline, OverflowPolicy, ProcessingStatus,
    QueueConfig, SIGNATURE_HEADER, SubmitOutcome, WebhookEnvelope, WebhookEvent, WebhookEventType,
    sign_payload, verify_signature,
};
pub use mapping::{
    FieldMapping, FieldMappingError, MappingRegistry, MappingSet, TransformationRule,
    ValidationRule,
};
pub use planner::{PlanOptions, PlannedAction, SyncAction, SyncPlan, SyncPlanner};
pub use poller::{Poller, PollerConfig};
pub use state::{
    ConflictRecord, ConflictResolution, FieldDiff, ResolutionStrategy, SyncDirection,
    SyncHistoryEntry, SyncState, SyncStatus,
};
pub use store::{MemorySyncStateStore, SyncStateStore};
pub use worker::WorkerPool;

#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`ScannerError`, `ClientError`)
//! - [`config`]: Task configuration (`ScanTaskConfig`, `InspectTaskConfig`, builders)
//! - [`catalog`]: Artifact model, catalog boundary, paged cursor, in-memory catalog
//! - [`blob`]: Blob store boundary and in-memory blob store
//! - [`fs_catalog`]: Directory-backed catalog and blob store
//! - [`ledger`]: Status ledger (`StatusLedger`, `LedgerEntry`, `LedgerMaintenance`)
//! - [`filter`]: Eligibility filter (scope and re-processing rules)
//! - [`prepare`]: Dependency graph and scan target preparation
//! - [`client`]: Analysis service client boundary (`AnalysisClient`)
//! - [`connection`]: Cached server connection (`ServerConnection`)
//! - [`submit`]: Submission to the analysis service
//! - [`waiter`]: Completion waiter with timeout and backoff
//! - [`reconcile`]: Result reconciliation into the ledger
//! - [`tasks`]: Repository task orchestrators (`ScanTask`, `InspectionTask`)
//!
//! # Architecture
//!
//! ```text
//! Repository --> CatalogCursor --> EligibilityFilter --> prepare
//!                                                          |
//!                                                      Submitter
//!                                                          |
//!                                                  CompletionWaiter
//!                                                          |
//!                                                     Reconciler
//!                                                          |
//!                                                    StatusLedger --> CatalogStore
//! ```

pub mod blob;
pub mod catalog;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod filter;
pub mod fs_catalog;
pub mod ledger;
pub mod prepare;
pub mod reconcile;
pub mod submit;
pub mod tasks;
pub mod waiter;

// --- Public API Re-exports ---

// Tasks (orchestrators)
pub use tasks::{InspectionTask, ScanTask};

// Configuration
pub use config::{
    CountingMode, InspectTaskConfig, InspectTaskConfigBuilder, ScanTaskConfig,
    ScanTaskConfigBuilder, SelectionSettings,
};

// Error
pub use error::{ClientError, ScannerError};

// Catalog & blobs
pub use blob::{BlobHandle, BlobStore, InMemoryBlobStore};
pub use catalog::{
    Artifact, ArtifactId, BlobRef, CatalogCursor, CatalogStore, Component, InMemoryCatalog, Page,
    PageQuery, StatusPanel,
};
pub use fs_catalog::FsCatalog;

// Ledger
pub use ledger::{LedgerEntry, LedgerMaintenance, RiskSummary, StatusLedger, TaskStatus};

// Filter
pub use filter::{EligibilityFilter, FilterMode, ProcessReason, SkipReason, Verdict};

// Analysis service
pub use client::{
    AnalysisClient, ComponentView, ProjectVersionView, ScanSubmission, SubmissionHandle,
    Vulnerability,
};
pub use connection::{ClientConnector, ServerConnection};
pub use waiter::{CompletionWaiter, WaitOutcome};

//! # kyc-intake
//!
//! The identity document intake pipeline: validation, content-addressed
//! storage, text recognition, field matching, normalization and scoring,
//! sequenced by [`ExtractionOrchestrator`] and exposed to collaborators
//! through [`DocumentIntake`].
//!
//! Auth, persistence and HTTP layers sit outside this crate; callers pass
//! an already verified subject id and receive plain values back.

pub mod orchestrator;
pub mod service;

pub use orchestrator::{ExtractionOrchestrator, ProcessOutcome};
pub use service::{DocumentIntake, HealthReport, StorageLimits, StorageReport};

//! clinicdb: visit composition and catalog backend for a small clinic
//!
//! The heart of the crate is [`composer`], which turns the procedures
//! selected for a visit into a total, a per-procedure breakdown and the
//! default materials consumed. Around it sit the in-memory [`storage`]
//! engine for clients, procedures, materials and visits, the
//! [`backend`] contract a front-end talks to, and a warp [`api`].

pub mod api;
pub mod backend;
pub mod catalog;
pub mod composer;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod storage;

pub use backend::{BackendError, ClinicBackend};
pub use catalog::{MaterialCatalog, ProcedureCatalog};
pub use composer::{
    ComposeReport, MissingReferenceWarning, ProcedureSelection, RecomputeSequencer, VisitComposer, VisitComposition,
    VisitDraft, VisitState,
};
pub use error::ClinicError;
pub use session::VisitSession;
pub use storage::{ClinicStore, StoreError};

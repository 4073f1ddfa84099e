//! Operator session around a single visit form
//!
//! Glues the pieces a front-end needs: catalog snapshots fetched from a
//! [`ClinicBackend`], the [`VisitDraft`] being edited, and sequencing for
//! recomputes that complete out of order. Failed backend calls never touch
//! the form, so the operator can simply try again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::backend::{BackendError, ClinicBackend};
use crate::catalog::{MaterialCatalog, ProcedureCatalog};
use crate::composer::{ComposeError, ProcedureSelection, RecomputeSequencer, VisitComposer, VisitDraft};
use crate::models::{ClientId, MaterialFilter, MaterialLine, ProcedureFilter, Visit, MAX_PAGE_LIMIT};
use crate::storage::StoreError;

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
}

/// Inputs of a recompute handed to an asynchronous worker
#[derive(Debug, Clone)]
pub struct RecomputeRequest {
    pub ticket: u64,
    pub selections: Vec<ProcedureSelection>,
    pub procedures: ProcedureCatalog,
    pub materials: MaterialCatalog,
}

impl RecomputeRequest {
    pub fn run(&self) -> Vec<MaterialLine> {
        VisitComposer::compute_default_materials(&self.selections, &self.procedures, &self.materials)
    }
}

pub struct VisitSession {
    backend: Arc<dyn ClinicBackend>,
    procedures: ProcedureCatalog,
    materials: MaterialCatalog,
    draft: VisitDraft,
    sequencer: RecomputeSequencer,
}

impl VisitSession {
    pub fn new(backend: Arc<dyn ClinicBackend>) -> Self {
        VisitSession {
            backend,
            procedures: ProcedureCatalog::default(),
            materials: MaterialCatalog::default(),
            draft: VisitDraft::new(),
            sequencer: RecomputeSequencer::new(),
        }
    }

    /// Session editing an already persisted visit
    pub fn open(backend: Arc<dyn ClinicBackend>, visit: &Visit) -> Self {
        VisitSession {
            draft: VisitDraft::from_saved(visit),
            ..Self::new(backend)
        }
    }

    pub fn draft(&self) -> &VisitDraft {
        &self.draft
    }

    pub fn procedures(&self) -> &ProcedureCatalog {
        &self.procedures
    }

    pub fn materials(&self) -> &MaterialCatalog {
        &self.materials
    }

    /// Replaces both snapshots with the active catalog. On failure the
    /// previous snapshots stay in place.
    pub fn refresh_catalogs(&mut self) -> Result<(), SessionError> {
        let procedures = self.backend.list_procedures(ProcedureFilter {
            active: Some(true),
            limit: Some(MAX_PAGE_LIMIT),
            ..ProcedureFilter::default()
        })?;
        let materials = self.backend.list_materials(MaterialFilter {
            active: Some(true),
            limit: Some(MAX_PAGE_LIMIT),
            ..MaterialFilter::default()
        })?;

        tracing::debug!(
            procedures = procedures.total,
            materials = materials.total,
            "catalog snapshots refreshed"
        );
        self.procedures = ProcedureCatalog::new(procedures.procedures);
        self.materials = MaterialCatalog::new(materials.materials);
        Ok(())
    }

    /// Adds a procedure after fetching its current default materials.
    /// A procedure the backend no longer knows is still added; the draft
    /// then carries a missing-reference warning for it.
    pub fn add_procedure(&mut self, selection: ProcedureSelection) -> Result<(), SessionError> {
        match self.backend.procedure_default_materials(selection.procedure_id) {
            Ok(defaults) => {
                self.procedures.set_default_materials(selection.procedure_id, defaults);
            }
            Err(BackendError::Rejected(StoreError::NotFound { .. })) => {
                tracing::warn!(procedure_id = selection.procedure_id, "procedure missing from backend");
            }
            Err(e) => return Err(e.into()),
        }

        self.draft.add_procedure(selection, &self.procedures, &self.materials)?;
        Ok(())
    }

    pub fn remove_procedure(&mut self, index: usize) -> Result<Option<ProcedureSelection>, SessionError> {
        Ok(self.draft.remove_procedure(index, &self.procedures, &self.materials)?)
    }

    pub fn set_charged_value(&mut self, value: f64) -> Result<(), SessionError> {
        Ok(self.draft.set_charged_value(value)?)
    }

    pub fn edit_materials(&mut self, edits: &[MaterialLine]) -> Result<(), SessionError> {
        Ok(self.draft.edit_materials(edits)?)
    }

    pub fn begin_edit(&mut self) -> Result<(), SessionError> {
        Ok(self.draft.begin_edit()?)
    }

    pub fn cancel(&mut self) -> Result<(), SessionError> {
        Ok(self.draft.cancel()?)
    }

    /// Tags a recompute of the current selections for off-thread execution
    pub fn begin_recompute(&self) -> RecomputeRequest {
        RecomputeRequest {
            ticket: self.sequencer.next(),
            selections: self.draft.selections().to_vec(),
            procedures: self.procedures.clone(),
            materials: self.materials.clone(),
        }
    }

    /// Installs a recompute result unless a newer one was already applied.
    /// Returns whether the lines were used.
    pub fn apply_recompute(&mut self, ticket: u64, lines: Vec<MaterialLine>) -> Result<bool, SessionError> {
        if !self.sequencer.accept(ticket) {
            tracing::debug!(ticket, latest = self.sequencer.latest(), "discarding stale recompute");
            return Ok(false);
        }
        self.draft.apply_materials(lines)?;
        Ok(true)
    }

    /// Validates locally, then creates or updates the visit. Incomplete
    /// forms never reach the backend, and a failed call leaves the draft
    /// exactly as it was.
    pub fn submit(
        &mut self,
        client_id: ClientId,
        performed_at: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<Visit, SessionError> {
        let saved = match self.draft.visit_id() {
            None => {
                let payload = self.draft.to_new_visit(client_id, performed_at, notes)?;
                self.backend.create_visit(payload)
            }
            Some(id) => {
                let mut update = self.draft.to_visit_update()?;
                update.client_id = Some(client_id);
                update.performed_at = Some(performed_at);
                update.notes = notes;
                self.backend.update_visit(id, update)
            }
        };

        let visit = match saved {
            Ok(visit) => visit,
            Err(e) => {
                tracing::error!(error = %e, "visit submission failed, form kept");
                return Err(e.into());
            }
        };

        self.draft.mark_saved(visit.id)?;
        Ok(visit)
    }
}

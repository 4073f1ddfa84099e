//! The backend contract visit composition relies on
//!
//! A front-end only ever needs five calls: list procedures, fetch one
//! procedure's default materials, list materials, and create or update a
//! visit. [`ClinicStore`] answers them in process; anything else speaking
//! the same contract (a remote client, a test double) can stand in.

use thiserror::Error;

use crate::models::{
    DefaultMaterial, MaterialFilter, MaterialList, NewVisit, ProcedureFilter, ProcedureId, ProcedureList, Visit,
    VisitId, VisitUpdate,
};
use crate::storage::{ClinicStore, StoreError};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// The backend could not be reached or did not answer
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The backend answered and refused the request
    #[error("backend rejected request: {0}")]
    Rejected(#[from] StoreError),
}

pub trait ClinicBackend: Send + Sync {
    fn list_procedures(&self, filter: ProcedureFilter) -> Result<ProcedureList, BackendError>;

    fn procedure_default_materials(&self, procedure_id: ProcedureId) -> Result<Vec<DefaultMaterial>, BackendError>;

    fn list_materials(&self, filter: MaterialFilter) -> Result<MaterialList, BackendError>;

    fn create_visit(&self, visit: NewVisit) -> Result<Visit, BackendError>;

    fn update_visit(&self, id: VisitId, update: VisitUpdate) -> Result<Visit, BackendError>;
}

impl ClinicBackend for ClinicStore {
    fn list_procedures(&self, filter: ProcedureFilter) -> Result<ProcedureList, BackendError> {
        Ok(ClinicStore::list_procedures(self, filter))
    }

    fn procedure_default_materials(&self, procedure_id: ProcedureId) -> Result<Vec<DefaultMaterial>, BackendError> {
        Ok(ClinicStore::procedure_default_materials(self, procedure_id)?)
    }

    fn list_materials(&self, filter: MaterialFilter) -> Result<MaterialList, BackendError> {
        Ok(ClinicStore::list_materials(self, filter))
    }

    fn create_visit(&self, visit: NewVisit) -> Result<Visit, BackendError> {
        Ok(ClinicStore::create_visit(self, visit)?)
    }

    fn update_visit(&self, id: VisitId, update: VisitUpdate) -> Result<Visit, BackendError> {
        Ok(ClinicStore::update_visit(self, id, update)?)
    }
}

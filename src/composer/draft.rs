use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ComposeError, MissingReferenceWarning, ProcedureSelection, ValidationError, VisitComposer, VisitComposition};
use crate::catalog::{MaterialCatalog, ProcedureCatalog};
use crate::models::{ClientId, MaterialLine, NewVisit, ProcedureCharge, Visit, VisitId, VisitStatus, VisitUpdate};

/// Lifecycle of a visit record as seen by the operator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VisitState {
    /// Being composed, never persisted
    Draft,
    /// Persisted with a snapshot of its material lines and total
    Saved,
    /// A saved visit reopened for changes
    Edited,
    Cancelled,
}

/// The visit form: selected procedures, what they cost, what they consume,
/// and whatever the operator has typed over the computed values.
#[derive(Debug, Clone)]
pub struct VisitDraft {
    state: VisitState,
    visit_id: Option<VisitId>,
    selections: Vec<ProcedureSelection>,
    procedure_charges: Vec<ProcedureCharge>,
    computed_total: f64,
    charged_override: Option<f64>,
    computed_materials: Vec<MaterialLine>,
    manual_materials: Option<Vec<MaterialLine>>,
    warnings: Vec<MissingReferenceWarning>,
}

impl Default for VisitDraft {
    fn default() -> Self {
        Self::new()
    }
}

impl VisitDraft {
    pub fn new() -> Self {
        VisitDraft {
            state: VisitState::Draft,
            visit_id: None,
            selections: Vec::new(),
            procedure_charges: Vec::new(),
            computed_total: 0.0,
            charged_override: None,
            computed_materials: Vec::new(),
            manual_materials: None,
            warnings: Vec::new(),
        }
    }

    /// Reopens a persisted visit. Material lines and charges come from the
    /// stored snapshot, not from today's catalog defaults. A cancelled visit
    /// reopens read-only.
    pub fn from_saved(visit: &Visit) -> Self {
        let state = match visit.status {
            VisitStatus::Cancelado => VisitState::Cancelled,
            VisitStatus::Realizado | VisitStatus::Reagendado => VisitState::Edited,
        };
        VisitDraft {
            state,
            visit_id: Some(visit.id),
            selections: visit
                .procedures
                .iter()
                .map(|c| ProcedureSelection {
                    procedure_id: c.procedure_id,
                    observation: c.observation.clone(),
                })
                .collect(),
            procedure_charges: visit.procedures.clone(),
            computed_total: visit.procedures.iter().map(|c| c.value_charged).sum(),
            charged_override: Some(visit.charged_value),
            computed_materials: visit.materials_used.clone(),
            manual_materials: None,
            warnings: Vec::new(),
        }
    }

    pub fn state(&self) -> VisitState {
        self.state
    }

    pub fn visit_id(&self) -> Option<VisitId> {
        self.visit_id
    }

    pub fn selections(&self) -> &[ProcedureSelection] {
        &self.selections
    }

    pub fn warnings(&self) -> &[MissingReferenceWarning] {
        &self.warnings
    }

    /// What the visit will be charged: the operator's value if one was
    /// typed, otherwise the computed total
    pub fn charged_value(&self) -> f64 {
        self.charged_override.unwrap_or(self.computed_total)
    }

    pub fn material_lines(&self) -> &[MaterialLine] {
        self.manual_materials.as_deref().unwrap_or(&self.computed_materials)
    }

    pub fn composition(&self) -> VisitComposition {
        VisitComposition {
            total_value: self.computed_total,
            procedure_charges: self.procedure_charges.clone(),
            material_lines: self.material_lines().to_vec(),
        }
    }

    pub fn add_procedure(
        &mut self,
        selection: ProcedureSelection,
        procedures: &ProcedureCatalog,
        materials: &MaterialCatalog,
    ) -> Result<(), ComposeError> {
        self.ensure_editable("add a procedure to")?;
        self.selections.push(selection);
        self.recompute(procedures, materials);
        Ok(())
    }

    /// Removes the selection at `index`. Out-of-range indexes change nothing.
    pub fn remove_procedure(
        &mut self,
        index: usize,
        procedures: &ProcedureCatalog,
        materials: &MaterialCatalog,
    ) -> Result<Option<ProcedureSelection>, ComposeError> {
        self.ensure_editable("remove a procedure from")?;
        if index >= self.selections.len() {
            return Ok(None);
        }
        let removed = self.selections.remove(index);
        self.recompute(procedures, materials);
        Ok(Some(removed))
    }

    /// Recomputes charges and default materials for the current procedure
    /// set. Manual material edits and a typed charged value are discarded.
    pub fn recompute(&mut self, procedures: &ProcedureCatalog, materials: &MaterialCatalog) {
        let report = VisitComposer::compose(&self.selections, procedures, materials);

        for warning in &report.warnings {
            tracing::warn!(%warning, "missing catalog reference while composing visit");
        }
        tracing::debug!(
            procedures = self.selections.len(),
            materials = report.composition.material_lines.len(),
            total = report.composition.total_value,
            "visit recomposed"
        );

        self.procedure_charges = report.composition.procedure_charges;
        self.computed_total = report.composition.total_value;
        self.computed_materials = report.composition.material_lines;
        self.warnings = report.warnings;
        self.manual_materials = None;
        self.charged_override = None;
    }

    /// Installs material lines computed elsewhere, e.g. by an asynchronous
    /// recompute whose ticket was accepted
    pub fn apply_materials(&mut self, lines: Vec<MaterialLine>) -> Result<(), ComposeError> {
        self.ensure_editable("recompute materials of")?;
        self.computed_materials = lines;
        self.manual_materials = None;
        Ok(())
    }

    pub fn set_charged_value(&mut self, value: f64) -> Result<(), ComposeError> {
        self.ensure_editable("change the charged value of")?;
        self.charged_override = Some(value);
        Ok(())
    }

    pub fn clear_charged_value(&mut self) -> Result<(), ComposeError> {
        self.ensure_editable("change the charged value of")?;
        self.charged_override = None;
        Ok(())
    }

    pub fn edit_materials(&mut self, edits: &[MaterialLine]) -> Result<(), ComposeError> {
        self.ensure_editable("edit materials of")?;
        self.manual_materials = Some(VisitComposer::merge_manual_override(&self.computed_materials, edits));
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        VisitComposer::validate(&self.selections, self.charged_value(), self.material_lines())
    }

    /// Payload for creating the visit; fails locally when the form is incomplete
    pub fn to_new_visit(
        &self,
        client_id: ClientId,
        performed_at: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<NewVisit, ComposeError> {
        self.ensure_editable("submit")?;
        self.validate()?;
        Ok(NewVisit {
            client_id,
            performed_at,
            charged_value: self.charged_value(),
            notes,
            status: VisitStatus::Realizado,
            procedures: self.procedure_charges.clone(),
            materials_used: self.material_lines().to_vec(),
        })
    }

    /// Payload for updating an already persisted visit
    pub fn to_visit_update(&self) -> Result<VisitUpdate, ComposeError> {
        self.ensure_editable("submit")?;
        self.validate()?;
        Ok(VisitUpdate {
            charged_value: Some(self.charged_value()),
            procedures: Some(self.procedure_charges.clone()),
            materials_used: Some(self.material_lines().to_vec()),
            ..VisitUpdate::default()
        })
    }

    pub fn mark_saved(&mut self, visit_id: VisitId) -> Result<(), ComposeError> {
        match self.state {
            VisitState::Draft | VisitState::Edited => {
                self.state = VisitState::Saved;
                self.visit_id = Some(visit_id);
                Ok(())
            }
            state => Err(ComposeError::InvalidTransition { state, action: "save" }),
        }
    }

    pub fn begin_edit(&mut self) -> Result<(), ComposeError> {
        match self.state {
            VisitState::Saved => {
                self.state = VisitState::Edited;
                Ok(())
            }
            VisitState::Edited => Ok(()),
            state => Err(ComposeError::InvalidTransition { state, action: "edit" }),
        }
    }

    pub fn cancel(&mut self) -> Result<(), ComposeError> {
        match self.state {
            VisitState::Cancelled => Err(ComposeError::InvalidTransition {
                state: VisitState::Cancelled,
                action: "cancel",
            }),
            _ => {
                self.state = VisitState::Cancelled;
                Ok(())
            }
        }
    }

    fn ensure_editable(&self, action: &'static str) -> Result<(), ComposeError> {
        match self.state {
            VisitState::Draft | VisitState::Edited => Ok(()),
            state => Err(ComposeError::InvalidTransition { state, action }),
        }
    }
}

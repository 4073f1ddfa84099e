//! Visit composition
//!
//! Turns an ordered list of selected procedures into what a visit charges
//! and what it consumes:
//! - the total charged value and a per-procedure breakdown
//! - the default material lines, merged by material and priced at the
//!   moment of composition
//!
//! Everything here is pure: the same selections against the same catalog
//! snapshots always produce the same composition, line order included.

pub mod draft;
pub mod sequence;

pub use draft::{VisitDraft, VisitState};
pub use sequence::RecomputeSequencer;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{MaterialCatalog, ProcedureCatalog};
use crate::models::{MaterialId, MaterialLine, ProcedureCharge, ProcedureId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcedureSelection {
    pub procedure_id: ProcedureId,
    #[serde(default)]
    pub observation: Option<String>,
}

impl ProcedureSelection {
    pub fn new(procedure_id: ProcedureId) -> Self {
        ProcedureSelection { procedure_id, observation: None }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VisitComposition {
    pub total_value: f64,
    pub procedure_charges: Vec<ProcedureCharge>,
    pub material_lines: Vec<MaterialLine>,
}

/// A reference to something no longer in the catalog snapshot.
/// Composition carries on with a zero or omitted contribution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissingReferenceWarning {
    Procedure { index: usize, procedure_id: ProcedureId },
    Material { procedure_id: ProcedureId, material_id: MaterialId },
}

impl fmt::Display for MissingReferenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingReferenceWarning::Procedure { index, procedure_id } => {
                write!(f, "selection {} references unknown procedure {}", index, procedure_id)
            }
            MissingReferenceWarning::Material { procedure_id, material_id } => {
                write!(f, "procedure {} references unknown material {}", procedure_id, material_id)
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComposeReport {
    pub composition: VisitComposition,
    pub warnings: Vec<MissingReferenceWarning>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("no procedure selected")]
    NoProcedure,
    #[error("material line {index} has no usable quantity")]
    MissingQuantity { index: usize },
    #[error("material line {index} has a negative unit price")]
    NegativePrice { index: usize },
    #[error("charged value must not be negative")]
    NegativeChargedValue,
}

#[derive(Debug, Error, PartialEq)]
pub enum ComposeError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("cannot {action} a visit in state {state:?}")]
    InvalidTransition { state: VisitState, action: &'static str },
}

pub struct VisitComposer;

impl VisitComposer {
    /// Sums the catalog price of each selection. Unknown procedures add 0
    /// and produce a warning instead of failing.
    pub fn compute_total(
        selections: &[ProcedureSelection],
        catalog: &ProcedureCatalog,
    ) -> (f64, Vec<MissingReferenceWarning>) {
        let charges = Self::procedure_charges(selections, catalog);
        let total = charges.0.iter().map(|c| c.value_charged).sum();
        (total, charges.1)
    }

    /// One charge per selection, in selection order
    pub fn procedure_charges(
        selections: &[ProcedureSelection],
        catalog: &ProcedureCatalog,
    ) -> (Vec<ProcedureCharge>, Vec<MissingReferenceWarning>) {
        let mut warnings = Vec::new();
        let charges = selections
            .iter()
            .enumerate()
            .map(|(index, selection)| {
                let value_charged = match catalog.get(selection.procedure_id) {
                    Some(procedure) => procedure.default_price.max(0.0),
                    None => {
                        warnings.push(MissingReferenceWarning::Procedure {
                            index,
                            procedure_id: selection.procedure_id,
                        });
                        0.0
                    }
                };
                ProcedureCharge {
                    procedure_id: selection.procedure_id,
                    value_charged,
                    observation: selection.observation.clone(),
                }
            })
            .collect();
        (charges, warnings)
    }

    /// Default material consumption for the selections, one line per
    /// material in order of first appearance. Quantities add up across
    /// repeated procedures; the unit price is read once, when the material
    /// first shows up. Materials missing from the snapshot are skipped.
    pub fn compute_default_materials(
        selections: &[ProcedureSelection],
        procedures: &ProcedureCatalog,
        materials: &MaterialCatalog,
    ) -> Vec<MaterialLine> {
        Self::default_materials_with_warnings(selections, procedures, materials).0
    }

    fn default_materials_with_warnings(
        selections: &[ProcedureSelection],
        procedures: &ProcedureCatalog,
        materials: &MaterialCatalog,
    ) -> (Vec<MaterialLine>, Vec<MissingReferenceWarning>) {
        let mut lines: Vec<MaterialLine> = Vec::new();
        let mut positions: HashMap<MaterialId, usize> = HashMap::new();
        let mut warnings = Vec::new();

        for selection in selections {
            for default in procedures.default_materials(selection.procedure_id) {
                if let Some(&pos) = positions.get(&default.material_id) {
                    lines[pos].quantity_used += default.default_quantity;
                    continue;
                }

                let Some(unit_price) = materials.unit_price(default.material_id) else {
                    warnings.push(MissingReferenceWarning::Material {
                        procedure_id: selection.procedure_id,
                        material_id: default.material_id,
                    });
                    continue;
                };

                positions.insert(default.material_id, lines.len());
                lines.push(MaterialLine {
                    material_id: default.material_id,
                    quantity_used: default.default_quantity,
                    unit_price_at_time: unit_price,
                });
            }
        }

        (lines, warnings)
    }

    /// Applies operator edits by position. Edit `i` replaces line `i`,
    /// extra edits are appended and computed lines past the end of the
    /// edit list are dropped, whatever their material.
    pub fn merge_manual_override(computed: &[MaterialLine], manual_edits: &[MaterialLine]) -> Vec<MaterialLine> {
        let mut merged: Vec<MaterialLine> = computed.iter().take(manual_edits.len()).copied().collect();
        for (index, edit) in manual_edits.iter().enumerate() {
            match merged.get_mut(index) {
                Some(line) => *line = *edit,
                None => merged.push(*edit),
            }
        }
        merged
    }

    /// Full composition of a visit together with every missing reference
    pub fn compose(
        selections: &[ProcedureSelection],
        procedures: &ProcedureCatalog,
        materials: &MaterialCatalog,
    ) -> ComposeReport {
        let (procedure_charges, mut warnings) = Self::procedure_charges(selections, procedures);
        let (material_lines, material_warnings) =
            Self::default_materials_with_warnings(selections, procedures, materials);
        warnings.extend(material_warnings);

        let total_value = procedure_charges.iter().map(|c| c.value_charged).sum();

        ComposeReport {
            composition: VisitComposition {
                total_value,
                procedure_charges,
                material_lines,
            },
            warnings,
        }
    }

    /// Checks a composition is fit to submit
    pub fn validate(
        selections: &[ProcedureSelection],
        charged_value: f64,
        material_lines: &[MaterialLine],
    ) -> Result<(), ValidationError> {
        if selections.is_empty() {
            return Err(ValidationError::NoProcedure);
        }
        if !(charged_value >= 0.0) {
            return Err(ValidationError::NegativeChargedValue);
        }
        for (index, line) in material_lines.iter().enumerate() {
            if !(line.quantity_used > 0.0) {
                return Err(ValidationError::MissingQuantity { index });
            }
            if !(line.unit_price_at_time >= 0.0) {
                return Err(ValidationError::NegativePrice { index });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::{material, procedure};
    use pretty_assertions::assert_eq;

    fn selections(ids: &[u64]) -> Vec<ProcedureSelection> {
        ids.iter().map(|&id| ProcedureSelection::new(id)).collect()
    }

    fn line(material_id: u64, quantity_used: f64, unit_price_at_time: f64) -> MaterialLine {
        MaterialLine { material_id, quantity_used, unit_price_at_time }
    }

    #[test]
    fn test_total_matches_charges() {
        let catalog = ProcedureCatalog::new(vec![
            procedure(1, 100.0, &[]),
            procedure(2, 45.5, &[]),
            procedure(3, 80.0, &[]),
        ]);
        let picked = selections(&[1, 2, 3, 2]);

        let (total, warnings) = VisitComposer::compute_total(&picked, &catalog);
        let (charges, _) = VisitComposer::procedure_charges(&picked, &catalog);

        assert_eq!(total, 271.0);
        assert!(warnings.is_empty());
        assert_eq!(charges.len(), 4);
        assert_eq!(charges.iter().map(|c| c.value_charged).sum::<f64>(), total);
    }

    #[test]
    fn test_shared_material_is_merged() {
        let procedures = ProcedureCatalog::new(vec![
            procedure(1, 50.0, &[(10, 2.0)]),
            procedure(2, 70.0, &[(10, 3.0)]),
        ]);
        let materials = MaterialCatalog::new(vec![material(10, 1.25)]);

        let lines = VisitComposer::compute_default_materials(&selections(&[1, 2]), &procedures, &materials);
        assert_eq!(lines, vec![line(10, 5.0, 1.25)]);
    }

    #[test]
    fn test_unknown_procedure_contributes_nothing() {
        let procedures = ProcedureCatalog::new(vec![procedure(1, 100.0, &[(10, 1.0)])]);
        let materials = MaterialCatalog::new(vec![material(10, 2.0)]);

        let report = VisitComposer::compose(&selections(&[1, 42]), &procedures, &materials);

        assert_eq!(report.composition.total_value, 100.0);
        assert_eq!(report.composition.procedure_charges[1].value_charged, 0.0);
        assert_eq!(
            report.warnings,
            vec![MissingReferenceWarning::Procedure { index: 1, procedure_id: 42 }]
        );
    }

    #[test]
    fn test_unknown_material_is_skipped() {
        let procedures = ProcedureCatalog::new(vec![procedure(1, 10.0, &[(10, 1.0), (11, 2.0)])]);
        let materials = MaterialCatalog::new(vec![material(11, 3.0)]);

        let report = VisitComposer::compose(&selections(&[1]), &procedures, &materials);
        assert_eq!(report.composition.material_lines, vec![line(11, 2.0, 3.0)]);
        assert_eq!(
            report.warnings,
            vec![MissingReferenceWarning::Material { procedure_id: 1, material_id: 10 }]
        );
    }

    #[test]
    fn test_override_drops_removed_line() {
        let computed = vec![line(1, 1.0, 1.0), line(2, 2.0, 2.0), line(3, 3.0, 3.0)];
        let edits = vec![line(1, 1.0, 1.0), line(3, 3.0, 3.0)];

        let merged = VisitComposer::merge_manual_override(&computed, &edits);
        assert_eq!(merged, edits);

        let appended = VisitComposer::merge_manual_override(&computed[..1], &[line(9, 4.0, 0.5), line(8, 1.0, 1.0)]);
        assert_eq!(appended, vec![line(9, 4.0, 0.5), line(8, 1.0, 1.0)]);

        assert!(VisitComposer::merge_manual_override(&computed, &[]).is_empty());
    }

    #[test]
    fn test_materials_are_deterministic() {
        let procedures = ProcedureCatalog::new(vec![
            procedure(1, 10.0, &[(30, 1.0), (10, 1.0)]),
            procedure(2, 10.0, &[(20, 1.0), (30, 2.0)]),
        ]);
        let materials = MaterialCatalog::new(vec![material(10, 1.0), material(20, 2.0), material(30, 3.0)]);
        let picked = selections(&[1, 2]);

        let first = VisitComposer::compute_default_materials(&picked, &procedures, &materials);
        let second = VisitComposer::compute_default_materials(&picked, &procedures, &materials);

        assert_eq!(first, second);
        let order: Vec<u64> = first.iter().map(|l| l.material_id).collect();
        assert_eq!(order, vec![30, 10, 20]);
        assert_eq!(first[0].quantity_used, 3.0);
    }

    #[test]
    fn test_repeated_procedure_end_to_end() {
        let procedures = ProcedureCatalog::new(vec![procedure(1, 100.0, &[(1, 2.0)])]);
        let materials = MaterialCatalog::new(vec![material(1, 5.0)]);

        let report = VisitComposer::compose(&selections(&[1, 1]), &procedures, &materials);

        assert_eq!(report.composition.total_value, 200.0);
        assert_eq!(report.composition.material_lines, vec![line(1, 4.0, 5.0)]);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_price_is_captured_at_composition() {
        let procedures = ProcedureCatalog::new(vec![procedure(1, 100.0, &[(1, 1.0)])]);
        let before = MaterialCatalog::new(vec![material(1, 5.0)]);
        let lines = VisitComposer::compute_default_materials(&selections(&[1]), &procedures, &before);

        let after = MaterialCatalog::new(vec![material(1, 9.0)]);
        let _ = VisitComposer::compute_default_materials(&selections(&[1]), &procedures, &after);

        assert_eq!(lines[0].unit_price_at_time, 5.0);
    }

    #[test]
    fn test_validate() {
        assert_eq!(VisitComposer::validate(&[], 0.0, &[]), Err(ValidationError::NoProcedure));
        assert_eq!(
            VisitComposer::validate(&selections(&[1]), 10.0, &[line(1, 0.0, 1.0)]),
            Err(ValidationError::MissingQuantity { index: 0 })
        );
        assert_eq!(
            VisitComposer::validate(&selections(&[1]), -1.0, &[]),
            Err(ValidationError::NegativeChargedValue)
        );
        assert_eq!(
            VisitComposer::validate(&selections(&[1]), 10.0, &[line(1, 1.0, -2.0)]),
            Err(ValidationError::NegativePrice { index: 0 })
        );
        assert!(VisitComposer::validate(&selections(&[1]), 10.0, &[line(1, 1.0, 2.0)]).is_ok());
    }
}

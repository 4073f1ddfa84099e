//! Read-only catalog snapshots
//!
//! The composer never reaches into live state. Callers fetch procedures and
//! materials once, freeze them into these snapshots and pass them in, so the
//! same inputs always compose to the same visit.

pub mod normalize;

use std::collections::HashMap;

use crate::models::{DefaultMaterial, Material, MaterialId, Procedure, ProcedureId};

#[derive(Debug, Clone, Default)]
pub struct ProcedureCatalog {
    procedures: HashMap<ProcedureId, Procedure>,
}

impl ProcedureCatalog {
    pub fn new(procedures: impl IntoIterator<Item = Procedure>) -> Self {
        ProcedureCatalog {
            procedures: procedures.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn get(&self, id: ProcedureId) -> Option<&Procedure> {
        self.procedures.get(&id)
    }

    pub fn contains(&self, id: ProcedureId) -> bool {
        self.procedures.contains_key(&id)
    }

    /// Default materials of a procedure, empty when the procedure is unknown
    pub fn default_materials(&self, id: ProcedureId) -> &[DefaultMaterial] {
        self.procedures
            .get(&id)
            .map(|p| p.default_materials.as_slice())
            .unwrap_or(&[])
    }

    /// Replaces the default materials of a known procedure with a fresher
    /// list fetched on its own. Returns false when the id is not in the snapshot.
    pub fn set_default_materials(&mut self, id: ProcedureId, materials: Vec<DefaultMaterial>) -> bool {
        match self.procedures.get_mut(&id) {
            Some(procedure) => {
                procedure.default_materials = materials;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MaterialCatalog {
    materials: HashMap<MaterialId, Material>,
}

impl MaterialCatalog {
    pub fn new(materials: impl IntoIterator<Item = Material>) -> Self {
        MaterialCatalog {
            materials: materials.into_iter().map(|m| (m.id, m)).collect(),
        }
    }

    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(&id)
    }

    pub fn unit_price(&self, id: MaterialId) -> Option<f64> {
        self.materials.get(&id).map(|m| m.unit_price)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

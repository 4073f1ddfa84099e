//! Core clinic store
//!
//! Holds every table in memory behind a single lock:
//! - clients, procedures, materials and visits
//! - stock bookkeeping for materials consumed on visits
//! - sequential id allocation per table
//!
//! Snapshots of the whole store are what gets written to disk, see
//! [`persistence`].

pub mod persistence;

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::normalize::{self, SimilarMaterial};
use crate::models::{
    Client, ClientId, ClientList, ClientUpdate, DefaultMaterial, Material, MaterialFilter, MaterialId, MaterialLine,
    MaterialList, MaterialUpdate, NewClient, NewMaterial, NewProcedure, NewVisit, Paging, Procedure,
    ProcedureCharge, ProcedureFilter, ProcedureId, ProcedureList, ProcedureUpdate, StockMovement, Visit,
    VisitFilter, VisitId, VisitList, VisitSummary, VisitUpdate,
};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error("insufficient stock for {name}: available {available}, requested {requested}")]
    InsufficientStock {
        material_id: MaterialId,
        name: String,
        available: f64,
        requested: f64,
    },
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NextIds {
    pub client: u64,
    pub procedure: u64,
    pub material: u64,
    pub visit: u64,
}

impl Default for NextIds {
    fn default() -> Self {
        NextIds { client: 1, procedure: 1, material: 1, visit: 1 }
    }
}

/// Every table of the store, as persisted
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreSnapshot {
    pub clients: BTreeMap<ClientId, Client>,
    pub procedures: BTreeMap<ProcedureId, Procedure>,
    pub materials: BTreeMap<MaterialId, Material>,
    pub visits: BTreeMap<VisitId, Visit>,
    #[serde(default)]
    pub next_ids: NextIds,
}

#[derive(Debug, Default)]
pub struct ClinicStore {
    tables: RwLock<StoreSnapshot>,
}

fn require_text(field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Invalid(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn require_non_negative(field: &str, value: f64) -> Result<(), StoreError> {
    if !(value >= 0.0) {
        return Err(StoreError::Invalid(format!("{} must not be negative", field)));
    }
    Ok(())
}

fn take_id(counter: &mut u64) -> u64 {
    let id = *counter;
    *counter += 1;
    id
}

// Total quantity per material, so repeated lines are checked together
fn quantities_by_material(lines: &[MaterialLine]) -> HashMap<MaterialId, f64> {
    let mut totals = HashMap::new();
    for line in lines {
        *totals.entry(line.material_id).or_insert(0.0) += line.quantity_used;
    }
    totals
}

impl StoreSnapshot {
    fn client(&self, id: ClientId) -> Result<&Client, StoreError> {
        self.clients.get(&id).ok_or(StoreError::NotFound { entity: "client", id })
    }

    fn procedure(&self, id: ProcedureId) -> Result<&Procedure, StoreError> {
        self.procedures.get(&id).ok_or(StoreError::NotFound { entity: "procedure", id })
    }

    fn material(&self, id: MaterialId) -> Result<&Material, StoreError> {
        self.materials.get(&id).ok_or(StoreError::NotFound { entity: "material", id })
    }

    fn check_default_materials(&self, defaults: &[DefaultMaterial]) -> Result<(), StoreError> {
        for default in defaults {
            self.material(default.material_id)?;
            if !(default.default_quantity > 0.0) {
                return Err(StoreError::Invalid(format!(
                    "default quantity for material {} must be positive",
                    default.material_id
                )));
            }
        }
        Ok(())
    }

    /// Procedures must exist, unless the charge was already on the visit
    /// being edited (`kept`)
    fn check_charges(&self, charges: &[ProcedureCharge], kept: &[ProcedureCharge]) -> Result<(), StoreError> {
        if charges.is_empty() {
            return Err(StoreError::Invalid("a visit needs at least one procedure".to_string()));
        }
        for charge in charges {
            if !kept.iter().any(|k| k.procedure_id == charge.procedure_id) {
                self.procedure(charge.procedure_id)?;
            }
            require_non_negative("value charged", charge.value_charged)?;
        }
        Ok(())
    }

    /// Materials must exist, unless the line was already on the visit being
    /// edited (`kept`). Settlement still rejects a changed quantity for a
    /// material that is gone.
    fn check_lines(&self, lines: &[MaterialLine], kept: &[MaterialLine]) -> Result<(), StoreError> {
        for line in lines {
            if !kept.iter().any(|k| k.material_id == line.material_id) {
                self.material(line.material_id)?;
            }
            if !(line.quantity_used > 0.0) {
                return Err(StoreError::Invalid(format!(
                    "quantity for material {} must be positive",
                    line.material_id
                )));
            }
            require_non_negative("unit price", line.unit_price_at_time)?;
        }
        Ok(())
    }

    /// Moves stock by `delta` per material (positive consumes), all or nothing
    fn settle_stock(&mut self, delta: &HashMap<MaterialId, f64>) -> Result<(), StoreError> {
        for (&material_id, &quantity) in delta {
            let material = self.material(material_id)?;
            if quantity > 0.0 && material.available_quantity < quantity {
                return Err(StoreError::InsufficientStock {
                    material_id,
                    name: material.name.clone(),
                    available: material.available_quantity,
                    requested: quantity,
                });
            }
        }

        for (material_id, quantity) in delta {
            if let Some(material) = self.materials.get_mut(material_id) {
                material.available_quantity -= quantity;
                if material.is_low_stock() {
                    tracing::warn!(
                        material_id = material.id,
                        available = material.available_quantity,
                        minimum = material.minimum_stock,
                        "material below minimum stock"
                    );
                }
            }
        }
        Ok(())
    }
}

impl ClinicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        ClinicStore { tables: RwLock::new(snapshot) }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreSnapshot> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreSnapshot> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    // Clients

    pub fn create_client(&self, new: NewClient) -> Result<Client, StoreError> {
        require_text("name", &new.name)?;
        require_text("phone", &new.phone)?;

        let mut tables = self.write();
        let client = Client {
            id: take_id(&mut tables.next_ids.client),
            name: new.name,
            phone: new.phone,
            email: new.email,
            notes: new.notes,
            registered_at: Utc::now(),
        };
        tables.clients.insert(client.id, client.clone());
        tracing::info!(client_id = client.id, "client created");
        Ok(client)
    }

    pub fn get_client(&self, id: ClientId) -> Result<Client, StoreError> {
        self.read().client(id).cloned()
    }

    pub fn list_clients(&self, paging: Paging) -> ClientList {
        let all: Vec<Client> = self.read().clients.values().cloned().collect();
        let (clients, total) = paging.apply(all);
        ClientList { clients, total }
    }

    /// Case-insensitive match on name or phone, ordered by name
    pub fn search_clients(&self, term: &str) -> ClientList {
        let needle = term.trim().to_lowercase();
        let mut clients: Vec<Client> = self
            .read()
            .clients
            .values()
            .filter(|c| c.name.to_lowercase().contains(&needle) || c.phone.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name));
        let total = clients.len();
        ClientList { clients, total }
    }

    pub fn update_client(&self, id: ClientId, update: ClientUpdate) -> Result<Client, StoreError> {
        if let Some(name) = &update.name {
            require_text("name", name)?;
        }
        if let Some(phone) = &update.phone {
            require_text("phone", phone)?;
        }

        let mut tables = self.write();
        let client = tables.clients.get_mut(&id).ok_or(StoreError::NotFound { entity: "client", id })?;
        if let Some(name) = update.name {
            client.name = name;
        }
        if let Some(phone) = update.phone {
            client.phone = phone;
        }
        if update.email.is_some() {
            client.email = update.email;
        }
        if update.notes.is_some() {
            client.notes = update.notes;
        }
        Ok(client.clone())
    }

    pub fn delete_client(&self, id: ClientId) -> Result<(), StoreError> {
        let mut tables = self.write();
        tables.client(id)?;
        if tables.visits.values().any(|v| v.client_id == id) {
            return Err(StoreError::Conflict(format!("client {} has visits", id)));
        }
        tables.clients.remove(&id);
        tracing::info!(client_id = id, "client deleted");
        Ok(())
    }

    // Procedures

    pub fn create_procedure(&self, new: NewProcedure) -> Result<Procedure, StoreError> {
        require_text("name", &new.name)?;
        require_non_negative("default price", new.default_price)?;

        let mut tables = self.write();
        tables.check_default_materials(&new.default_materials)?;

        let procedure = Procedure {
            id: take_id(&mut tables.next_ids.procedure),
            name: new.name,
            description: new.description,
            default_price: new.default_price,
            active: new.active,
            registered_at: Utc::now(),
            default_materials: new.default_materials,
        };
        tables.procedures.insert(procedure.id, procedure.clone());
        tracing::info!(
            procedure_id = procedure.id,
            default_materials = procedure.default_materials.len(),
            "procedure created"
        );
        Ok(procedure)
    }

    pub fn get_procedure(&self, id: ProcedureId) -> Result<Procedure, StoreError> {
        self.read().procedure(id).cloned()
    }

    pub fn list_procedures(&self, filter: ProcedureFilter) -> ProcedureList {
        let all: Vec<Procedure> = self
            .read()
            .procedures
            .values()
            .filter(|p| filter.active.map_or(true, |active| p.active == active))
            .cloned()
            .collect();
        let (procedures, total) = Paging { skip: filter.skip, limit: filter.limit }.apply(all);
        ProcedureList { procedures, total }
    }

    pub fn update_procedure(&self, id: ProcedureId, update: ProcedureUpdate) -> Result<Procedure, StoreError> {
        if let Some(name) = &update.name {
            require_text("name", name)?;
        }
        if let Some(price) = update.default_price {
            require_non_negative("default price", price)?;
        }

        let mut tables = self.write();
        tables.procedure(id)?;
        if let Some(defaults) = &update.default_materials {
            tables.check_default_materials(defaults)?;
        }

        let procedure = tables
            .procedures
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "procedure", id })?;
        if let Some(name) = update.name {
            procedure.name = name;
        }
        if let Some(price) = update.default_price {
            procedure.default_price = price;
        }
        if update.description.is_some() {
            procedure.description = update.description;
        }
        if let Some(active) = update.active {
            procedure.active = active;
        }
        if let Some(defaults) = update.default_materials {
            procedure.default_materials = defaults;
        }
        Ok(procedure.clone())
    }

    pub fn delete_procedure(&self, id: ProcedureId) -> Result<(), StoreError> {
        self.write()
            .procedures
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "procedure", id })
    }

    pub fn procedure_default_materials(&self, id: ProcedureId) -> Result<Vec<DefaultMaterial>, StoreError> {
        Ok(self.read().procedure(id)?.default_materials.clone())
    }

    // Materials

    pub fn create_material(&self, new: NewMaterial) -> Result<Material, StoreError> {
        require_text("name", &new.name)?;
        require_text("unit", &new.unit)?;
        require_non_negative("available quantity", new.available_quantity)?;
        require_non_negative("unit price", new.unit_price)?;
        require_non_negative("minimum stock", new.minimum_stock)?;

        let mut tables = self.write();
        let material = Material {
            id: take_id(&mut tables.next_ids.material),
            name: new.name,
            description: new.description,
            available_quantity: new.available_quantity,
            unit: new.unit,
            unit_price: new.unit_price,
            minimum_stock: new.minimum_stock,
            active: new.active,
            registered_at: Utc::now(),
        };
        tables.materials.insert(material.id, material.clone());
        tracing::info!(material_id = material.id, "material created");
        Ok(material)
    }

    /// Restocks the active material whose name is at least 90% similar to
    /// the new one, or registers it. The flag is true when a material was
    /// created.
    pub fn create_or_find_material(&self, new: NewMaterial) -> Result<(Material, bool), StoreError> {
        require_non_negative("available quantity", new.available_quantity)?;

        {
            let mut tables = self.write();
            let best = normalize::find_similar(&new.name, tables.materials.values().filter(|m| m.active), 0.9)
                .into_iter()
                .next();
            if let Some(found) = best {
                if let Some(material) = tables.materials.get_mut(&found.material.id) {
                    material.available_quantity += new.available_quantity;
                    tracing::info!(
                        material_id = material.id,
                        added = new.available_quantity,
                        similarity = found.similarity,
                        "stock added to similar material"
                    );
                    return Ok((material.clone(), false));
                }
            }
        }

        self.create_material(new).map(|m| (m, true))
    }

    pub fn get_material(&self, id: MaterialId) -> Result<Material, StoreError> {
        self.read().material(id).cloned()
    }

    pub fn list_materials(&self, filter: MaterialFilter) -> MaterialList {
        let all: Vec<Material> = self
            .read()
            .materials
            .values()
            .filter(|m| filter.active.map_or(true, |active| m.active == active))
            .filter(|m| filter.low_stock.map_or(true, |low| m.is_low_stock() == low))
            .cloned()
            .collect();
        let (materials, total) = Paging { skip: filter.skip, limit: filter.limit }.apply(all);
        MaterialList { materials, total }
    }

    /// Active materials at or below their minimum stock
    pub fn low_stock_materials(&self) -> MaterialList {
        let materials: Vec<Material> = self
            .read()
            .materials
            .values()
            .filter(|m| m.active && m.is_low_stock())
            .cloned()
            .collect();
        let total = materials.len();
        MaterialList { materials, total }
    }

    /// Active materials whose name scores at least `threshold`
    pub fn similar_materials(&self, name: &str, threshold: f64) -> Vec<SimilarMaterial> {
        let tables = self.read();
        normalize::find_similar(name, tables.materials.values().filter(|m| m.active), threshold)
    }

    pub fn update_material(&self, id: MaterialId, update: MaterialUpdate) -> Result<Material, StoreError> {
        if let Some(name) = &update.name {
            require_text("name", name)?;
        }
        if let Some(unit) = &update.unit {
            require_text("unit", unit)?;
        }
        for (field, value) in [
            ("available quantity", update.available_quantity),
            ("unit price", update.unit_price),
            ("minimum stock", update.minimum_stock),
        ] {
            if let Some(value) = value {
                require_non_negative(field, value)?;
            }
        }

        let mut tables = self.write();
        let material = tables
            .materials
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "material", id })?;

        if let Some(name) = update.name {
            material.name = name;
        }
        if update.description.is_some() {
            material.description = update.description;
        }
        if let Some(quantity) = update.available_quantity {
            material.available_quantity = quantity;
        }
        if let Some(unit) = update.unit {
            material.unit = unit;
        }
        if let Some(price) = update.unit_price {
            material.unit_price = price;
        }
        if let Some(minimum) = update.minimum_stock {
            material.minimum_stock = minimum;
        }
        if let Some(active) = update.active {
            material.active = active;
        }
        Ok(material.clone())
    }

    pub fn delete_material(&self, id: MaterialId) -> Result<(), StoreError> {
        self.write()
            .materials
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "material", id })
    }

    pub fn adjust_stock(&self, id: MaterialId, quantity: f64, movement: StockMovement) -> Result<Material, StoreError> {
        if !(quantity > 0.0) {
            return Err(StoreError::Invalid("adjustment quantity must be positive".to_string()));
        }

        let mut tables = self.write();
        let delta = match movement {
            StockMovement::Entrada => -quantity,
            StockMovement::Saida => quantity,
        };
        tables.settle_stock(&HashMap::from([(id, delta)]))?;

        let material = tables.material(id)?.clone();
        tracing::info!(material_id = id, ?movement, quantity, available = material.available_quantity, "stock adjusted");
        Ok(material)
    }

    // Visits

    /// Registers a visit and takes its materials out of stock. Either every
    /// line is available and the whole visit is stored, or nothing changes.
    pub fn create_visit(&self, new: NewVisit) -> Result<Visit, StoreError> {
        require_non_negative("charged value", new.charged_value)?;

        let mut tables = self.write();
        tables.client(new.client_id)?;
        tables.check_charges(&new.procedures, &[])?;
        tables.check_lines(&new.materials_used, &[])?;
        tables.settle_stock(&quantities_by_material(&new.materials_used))?;

        let visit = Visit {
            id: take_id(&mut tables.next_ids.visit),
            client_id: new.client_id,
            performed_at: new.performed_at,
            charged_value: new.charged_value,
            notes: new.notes,
            status: new.status,
            registered_at: Utc::now(),
            procedures: new.procedures,
            materials_used: new.materials_used,
        };
        tables.visits.insert(visit.id, visit.clone());
        tracing::info!(
            visit_id = visit.id,
            client_id = visit.client_id,
            procedures = visit.procedures.len(),
            materials = visit.materials_used.len(),
            charged = visit.charged_value,
            "visit created"
        );
        Ok(visit)
    }

    pub fn get_visit(&self, id: VisitId) -> Result<Visit, StoreError> {
        self.read()
            .visits
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "visit", id })
    }

    /// Matching visits, most recent first
    pub fn list_visits(&self, filter: &VisitFilter) -> VisitList {
        let mut all: Vec<Visit> = self
            .read()
            .visits
            .values()
            .filter(|v| filter.client_id.map_or(true, |id| v.client_id == id))
            .filter(|v| {
                filter
                    .procedure_id
                    .map_or(true, |id| v.procedures.iter().any(|c| c.procedure_id == id))
            })
            .filter(|v| filter.from.map_or(true, |from| v.performed_at >= from))
            .filter(|v| filter.to.map_or(true, |to| v.performed_at <= to))
            .filter(|v| filter.status.map_or(true, |status| v.status == status))
            .cloned()
            .collect();
        all.sort_by(|a, b| b.performed_at.cmp(&a.performed_at));

        let (visits, total) = Paging { skip: filter.skip, limit: filter.limit }.apply(all);
        VisitList { visits, total }
    }

    /// Partial update. New material lines are settled against the old ones:
    /// only the difference per material moves stock.
    pub fn update_visit(&self, id: VisitId, update: VisitUpdate) -> Result<Visit, StoreError> {
        let mut tables = self.write();
        let current = tables
            .visits
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "visit", id })?;

        if let Some(client_id) = update.client_id {
            tables.client(client_id)?;
        }
        if let Some(value) = update.charged_value {
            require_non_negative("charged value", value)?;
        }
        if let Some(charges) = &update.procedures {
            tables.check_charges(charges, &current.procedures)?;
        }
        if let Some(lines) = &update.materials_used {
            tables.check_lines(lines, &current.materials_used)?;
            let mut delta = quantities_by_material(lines);
            for (material_id, quantity) in quantities_by_material(&current.materials_used) {
                *delta.entry(material_id).or_insert(0.0) -= quantity;
            }
            // Unchanged lines settle nothing, even for materials deleted since
            delta.retain(|_, quantity| *quantity != 0.0);
            tables.settle_stock(&delta)?;
        }

        let mut visit = current;
        if let Some(client_id) = update.client_id {
            visit.client_id = client_id;
        }
        if let Some(performed_at) = update.performed_at {
            visit.performed_at = performed_at;
        }
        if let Some(value) = update.charged_value {
            visit.charged_value = value;
        }
        if update.notes.is_some() {
            visit.notes = update.notes;
        }
        if let Some(status) = update.status {
            visit.status = status;
        }
        if let Some(charges) = update.procedures {
            visit.procedures = charges;
        }
        if let Some(lines) = update.materials_used {
            visit.materials_used = lines;
        }

        tables.visits.insert(id, visit.clone());
        tracing::info!(visit_id = id, status = ?visit.status, "visit updated");
        Ok(visit)
    }

    /// Removes a visit. Consumed stock is not returned.
    pub fn delete_visit(&self, id: VisitId) -> Result<(), StoreError> {
        self.write()
            .visits
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "visit", id })
    }

    pub fn visit_summary(&self, now: DateTime<Utc>) -> VisitSummary {
        let start_of_day = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .unwrap_or(now);
        let start_of_month = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now);

        let tables = self.read();
        let this_month: Vec<&Visit> = tables
            .visits
            .values()
            .filter(|v| v.performed_at >= start_of_month)
            .collect();

        VisitSummary {
            total_visits: tables.visits.len(),
            visits_today: tables.visits.values().filter(|v| v.performed_at >= start_of_day).count(),
            visits_this_month: this_month.len(),
            charged_value_this_month: this_month.iter().map(|v| v.charged_value).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VisitStatus;
    use pretty_assertions::assert_eq;

    fn seeded_store() -> ClinicStore {
        let store = ClinicStore::new();
        store
            .create_client(NewClient {
                name: "Ana Souza".to_string(),
                phone: "11 99999-0000".to_string(),
                email: None,
                notes: None,
            })
            .unwrap();
        store
            .create_material(NewMaterial {
                name: "Seringa".to_string(),
                description: None,
                available_quantity: 10.0,
                unit: "un".to_string(),
                unit_price: 2.5,
                minimum_stock: 3.0,
                active: true,
            })
            .unwrap();
        store
            .create_procedure(NewProcedure {
                name: "Aplicação".to_string(),
                description: None,
                default_price: 150.0,
                active: true,
                default_materials: vec![DefaultMaterial { material_id: 1, default_quantity: 2.0 }],
            })
            .unwrap();
        store
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn new_visit(quantity: f64, performed_at: DateTime<Utc>) -> NewVisit {
        NewVisit {
            client_id: 1,
            performed_at,
            charged_value: 150.0,
            notes: None,
            status: VisitStatus::Realizado,
            procedures: vec![ProcedureCharge { procedure_id: 1, value_charged: 150.0, observation: None }],
            materials_used: vec![MaterialLine { material_id: 1, quantity_used: quantity, unit_price_at_time: 2.5 }],
        }
    }

    #[test]
    fn test_ids_are_sequential() {
        let store = seeded_store();
        let second = store
            .create_client(NewClient {
                name: "Bruno".to_string(),
                phone: "123".to_string(),
                email: None,
                notes: None,
            })
            .unwrap();
        assert_eq!(second.id, 2);
        assert_eq!(store.list_clients(Paging::default()).total, 2);
    }

    #[test]
    fn test_create_visit_consumes_stock() {
        let store = seeded_store();
        let visit = store.create_visit(new_visit(4.0, at(2, 10))).unwrap();

        assert_eq!(visit.id, 1);
        assert_eq!(store.get_material(1).unwrap().available_quantity, 6.0);
    }

    #[test]
    fn test_insufficient_stock_changes_nothing() {
        let store = seeded_store();
        let mut visit = new_visit(6.0, at(2, 10));
        visit.materials_used.push(MaterialLine { material_id: 1, quantity_used: 5.0, unit_price_at_time: 2.5 });

        let err = store.create_visit(visit).unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { material_id: 1, requested, .. } if requested == 11.0));
        assert_eq!(store.get_material(1).unwrap().available_quantity, 10.0);
        assert_eq!(store.list_visits(&VisitFilter::default()).total, 0);
    }

    #[test]
    fn test_visit_references_are_checked() {
        let store = seeded_store();

        let mut unknown_client = new_visit(1.0, at(2, 10));
        unknown_client.client_id = 9;
        assert_eq!(
            store.create_visit(unknown_client),
            Err(StoreError::NotFound { entity: "client", id: 9 })
        );

        let mut unknown_procedure = new_visit(1.0, at(2, 10));
        unknown_procedure.procedures[0].procedure_id = 4;
        assert_eq!(
            store.create_visit(unknown_procedure),
            Err(StoreError::NotFound { entity: "procedure", id: 4 })
        );
    }

    #[test]
    fn test_update_visit_settles_difference() {
        let store = seeded_store();
        let visit = store.create_visit(new_visit(4.0, at(2, 10))).unwrap();

        let updated = store
            .update_visit(
                visit.id,
                VisitUpdate {
                    materials_used: Some(vec![MaterialLine { material_id: 1, quantity_used: 1.0, unit_price_at_time: 2.5 }]),
                    status: Some(VisitStatus::Reagendado),
                    ..VisitUpdate::default()
                },
            )
            .unwrap();

        assert_eq!(updated.status, VisitStatus::Reagendado);
        assert_eq!(store.get_material(1).unwrap().available_quantity, 9.0);
    }

    #[test]
    fn test_list_visits_filters_and_orders() {
        let store = seeded_store();
        store.create_visit(new_visit(1.0, at(2, 10))).unwrap();
        store.create_visit(new_visit(1.0, at(4, 10))).unwrap();
        store.create_visit(new_visit(1.0, at(3, 10))).unwrap();

        let all = store.list_visits(&VisitFilter::default());
        let order: Vec<VisitId> = all.visits.iter().map(|v| v.id).collect();
        assert_eq!(order, vec![2, 3, 1]);

        let ranged = store.list_visits(&VisitFilter {
            from: Some(at(3, 0)),
            limit: Some(1),
            ..VisitFilter::default()
        });
        assert_eq!(ranged.total, 2);
        assert_eq!(ranged.visits.len(), 1);
        assert_eq!(ranged.visits[0].id, 2);

        let by_procedure = store.list_visits(&VisitFilter { procedure_id: Some(2), ..VisitFilter::default() });
        assert_eq!(by_procedure.total, 0);
    }

    #[test]
    fn test_low_stock_and_adjustments() {
        let store = seeded_store();
        assert_eq!(store.low_stock_materials().total, 0);

        store.adjust_stock(1, 7.0, StockMovement::Saida).unwrap();
        assert_eq!(store.low_stock_materials().total, 1);
        assert_eq!(
            store.list_materials(MaterialFilter { low_stock: Some(false), ..MaterialFilter::default() }).total,
            0
        );

        assert!(matches!(
            store.adjust_stock(1, 5.0, StockMovement::Saida),
            Err(StoreError::InsufficientStock { .. })
        ));
        let restocked = store.adjust_stock(1, 5.0, StockMovement::Entrada).unwrap();
        assert_eq!(restocked.available_quantity, 8.0);
        assert!(store.adjust_stock(1, 0.0, StockMovement::Entrada).is_err());
    }

    fn new_material(name: &str, quantity: f64) -> NewMaterial {
        NewMaterial {
            name: name.to_string(),
            description: None,
            available_quantity: quantity,
            unit: "un".to_string(),
            unit_price: 1.0,
            minimum_stock: 0.0,
            active: true,
        }
    }

    #[test]
    fn test_create_or_find_material() {
        let store = seeded_store();
        let (found, created) = store.create_or_find_material(new_material("  SERINGA ", 5.0)).unwrap();
        assert!(!created);
        assert_eq!(found.id, 1);
        assert_eq!(found.available_quantity, 15.0);
        assert_eq!(store.get_material(1).unwrap().available_quantity, 15.0);

        // Below the 0.9 bar a new material is registered with the given stock
        let (gaze, created) = store.create_or_find_material(new_material("Gaze", 20.0)).unwrap();
        assert!(created);
        assert_eq!(gaze.available_quantity, 20.0);
        assert!(matches!(
            store.create_or_find_material(new_material("Gaze", -1.0)),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn test_inactive_materials_are_not_matched() {
        let store = seeded_store();
        store
            .update_material(1, MaterialUpdate { active: Some(false), ..MaterialUpdate::default() })
            .unwrap();

        assert!(store.similar_materials("seringa", 0.8).is_empty());
        let (material, created) = store.create_or_find_material(new_material("Seringa", 3.0)).unwrap();
        assert!(created);
        assert_eq!(material.id, 2);
        assert_eq!(store.get_material(1).unwrap().available_quantity, 10.0);
    }

    #[test]
    fn test_update_visit_moves_stock_across_materials() {
        let store = seeded_store();
        store.create_material(new_material("Gaze", 8.0)).unwrap();
        store.create_material(new_material("Luva", 4.0)).unwrap();
        let mut visit = new_visit(4.0, at(2, 10));
        visit.materials_used.push(MaterialLine { material_id: 2, quantity_used: 3.0, unit_price_at_time: 1.0 });
        let visit = store.create_visit(visit).unwrap();
        assert_eq!(store.get_material(2).unwrap().available_quantity, 5.0);

        let lines = vec![
            MaterialLine { material_id: 1, quantity_used: 6.0, unit_price_at_time: 2.5 },
            MaterialLine { material_id: 3, quantity_used: 2.0, unit_price_at_time: 1.0 },
        ];
        store
            .update_visit(visit.id, VisitUpdate { materials_used: Some(lines), ..VisitUpdate::default() })
            .unwrap();

        assert_eq!(store.get_material(1).unwrap().available_quantity, 4.0);
        assert_eq!(store.get_material(2).unwrap().available_quantity, 8.0);
        assert_eq!(store.get_material(3).unwrap().available_quantity, 2.0);

        // One short material rejects the whole update
        let too_much = vec![
            MaterialLine { material_id: 1, quantity_used: 6.0, unit_price_at_time: 2.5 },
            MaterialLine { material_id: 2, quantity_used: 1.0, unit_price_at_time: 1.0 },
            MaterialLine { material_id: 3, quantity_used: 9.0, unit_price_at_time: 1.0 },
        ];
        let err = store
            .update_visit(visit.id, VisitUpdate { materials_used: Some(too_much), ..VisitUpdate::default() })
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { material_id: 3, .. }));
        assert_eq!(store.get_material(2).unwrap().available_quantity, 8.0);
        assert_eq!(store.get_visit(visit.id).unwrap().materials_used.len(), 2);
    }

    #[test]
    fn test_visit_keeps_lines_of_deleted_entities() {
        let store = seeded_store();
        let visit = store.create_visit(new_visit(4.0, at(2, 10))).unwrap();
        store.delete_material(1).unwrap();
        store.delete_procedure(1).unwrap();

        let resent = VisitUpdate {
            charged_value: Some(120.0),
            procedures: Some(visit.procedures.clone()),
            materials_used: Some(visit.materials_used.clone()),
            ..VisitUpdate::default()
        };
        let updated = store.update_visit(visit.id, resent).unwrap();
        assert_eq!(updated.charged_value, 120.0);
        assert_eq!(updated.materials_used, visit.materials_used);

        let changed = VisitUpdate {
            materials_used: Some(vec![MaterialLine { material_id: 1, quantity_used: 2.0, unit_price_at_time: 2.5 }]),
            ..VisitUpdate::default()
        };
        assert_eq!(
            store.update_visit(visit.id, changed),
            Err(StoreError::NotFound { entity: "material", id: 1 })
        );

        let mut fresh = new_visit(1.0, at(3, 10));
        fresh.materials_used.clear();
        assert_eq!(store.create_visit(fresh), Err(StoreError::NotFound { entity: "procedure", id: 1 }));
    }

    #[test]
    fn test_procedure_updates_replace_defaults() {
        let store = seeded_store();
        let updated = store
            .update_procedure(1, ProcedureUpdate { default_materials: Some(Vec::new()), ..ProcedureUpdate::default() })
            .unwrap();
        assert!(updated.default_materials.is_empty());
        assert_eq!(updated.default_price, 150.0);

        let bad = ProcedureUpdate {
            default_materials: Some(vec![DefaultMaterial { material_id: 77, default_quantity: 1.0 }]),
            ..ProcedureUpdate::default()
        };
        assert_eq!(store.update_procedure(1, bad), Err(StoreError::NotFound { entity: "material", id: 77 }));
        assert_eq!(
            store.list_procedures(ProcedureFilter { active: Some(false), ..ProcedureFilter::default() }).total,
            0
        );
    }

    #[test]
    fn test_client_with_visits_cannot_be_deleted() {
        let store = seeded_store();
        store.create_visit(new_visit(1.0, at(2, 10))).unwrap();
        assert!(matches!(store.delete_client(1), Err(StoreError::Conflict(_))));

        store.delete_visit(1).unwrap();
        store.delete_client(1).unwrap();
        assert_eq!(store.search_clients("ana").total, 0);
    }

    #[test]
    fn test_visit_summary() {
        let store = seeded_store();
        store.create_visit(new_visit(1.0, Utc.with_ymd_and_hms(2024, 4, 30, 10, 0, 0).unwrap())).unwrap();
        store.create_visit(new_visit(1.0, at(2, 10))).unwrap();
        store.create_visit(new_visit(1.0, at(15, 9))).unwrap();

        let summary = store.visit_summary(at(15, 18));
        assert_eq!(
            summary,
            VisitSummary {
                total_visits: 3,
                visits_today: 1,
                visits_this_month: 2,
                charged_value_this_month: 300.0,
            }
        );
    }
}

//! Persisted clinic entities and their request payloads
//!
//! These are the records the store keeps and the REST layer exchanges:
//! clients, procedures, materials and visits. Money and quantities are
//! plain `f64`, matching how the clinic has always recorded them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ClientId = u64;
pub type ProcedureId = u64;
pub type MaterialId = u64;
pub type VisitId = u64;

pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1000;

fn default_true() -> bool {
    true
}

fn default_unit() -> String {
    "un".to_string()
}

fn default_quantity() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClient {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

/// A material a procedure consumes by default, and how much of it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DefaultMaterial {
    pub material_id: MaterialId,
    #[serde(default = "default_quantity")]
    pub default_quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Procedure {
    pub id: ProcedureId,
    pub name: String,
    pub description: Option<String>,
    pub default_price: f64,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub default_materials: Vec<DefaultMaterial>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProcedure {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub default_price: f64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub default_materials: Vec<DefaultMaterial>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcedureUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub default_price: Option<f64>,
    pub active: Option<bool>,
    /// Replaces the whole default-material list when present
    pub default_materials: Option<Vec<DefaultMaterial>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Material {
    pub id: MaterialId,
    pub name: String,
    pub description: Option<String>,
    pub available_quantity: f64,
    pub unit: String,
    pub unit_price: f64,
    pub minimum_stock: f64,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
}

impl Material {
    pub fn is_low_stock(&self) -> bool {
        self.available_quantity <= self.minimum_stock
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMaterial {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub available_quantity: f64,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub unit_price: f64,
    #[serde(default)]
    pub minimum_stock: f64,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterialUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub available_quantity: Option<f64>,
    pub unit: Option<String>,
    pub unit_price: Option<f64>,
    pub minimum_stock: Option<f64>,
    pub active: Option<bool>,
}

/// Direction of a manual stock adjustment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StockMovement {
    Entrada,
    Saida,
}

/// What one selected procedure was charged on a visit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcedureCharge {
    pub procedure_id: ProcedureId,
    pub value_charged: f64,
    #[serde(default)]
    pub observation: Option<String>,
}

/// A material consumed on a visit, priced when the line was produced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MaterialLine {
    pub material_id: MaterialId,
    pub quantity_used: f64,
    pub unit_price_at_time: f64,
}

impl MaterialLine {
    pub fn subtotal(&self) -> f64 {
        self.quantity_used * self.unit_price_at_time
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VisitStatus {
    #[default]
    Realizado,
    Cancelado,
    Reagendado,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Visit {
    pub id: VisitId,
    pub client_id: ClientId,
    pub performed_at: DateTime<Utc>,
    pub charged_value: f64,
    pub notes: Option<String>,
    pub status: VisitStatus,
    pub registered_at: DateTime<Utc>,
    pub procedures: Vec<ProcedureCharge>,
    pub materials_used: Vec<MaterialLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewVisit {
    pub client_id: ClientId,
    pub performed_at: DateTime<Utc>,
    pub charged_value: f64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: VisitStatus,
    pub procedures: Vec<ProcedureCharge>,
    #[serde(default)]
    pub materials_used: Vec<MaterialLine>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VisitUpdate {
    pub client_id: Option<ClientId>,
    pub performed_at: Option<DateTime<Utc>>,
    pub charged_value: Option<f64>,
    pub notes: Option<String>,
    pub status: Option<VisitStatus>,
    /// Replaces the charged procedures when present
    pub procedures: Option<Vec<ProcedureCharge>>,
    /// Replaces the consumed materials when present; stock is settled
    /// against the previous lines
    pub materials_used: Option<Vec<MaterialLine>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Paging {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl Paging {
    /// Slices `items` and returns the page plus the unpaged total
    pub fn apply<T>(&self, items: Vec<T>) -> (Vec<T>, usize) {
        let total = items.len();
        let skip = self.skip.unwrap_or(0);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let page = items.into_iter().skip(skip).take(limit).collect();
        (page, total)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProcedureFilter {
    pub active: Option<bool>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MaterialFilter {
    pub active: Option<bool>,
    pub low_stock: Option<bool>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisitFilter {
    pub client_id: Option<ClientId>,
    pub procedure_id: Option<ProcedureId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub status: Option<VisitStatus>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientList {
    pub clients: Vec<Client>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcedureList {
    pub procedures: Vec<Procedure>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaterialList {
    pub materials: Vec<Material>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisitList {
    pub visits: Vec<Visit>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisitSummary {
    pub total_visits: usize,
    pub visits_today: usize,
    pub visits_this_month: usize,
    pub charged_value_this_month: f64,
}

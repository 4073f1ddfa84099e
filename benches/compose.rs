//! Benchmarks for visit composition.
//!
//! Composition runs on every procedure added to or removed from the visit
//! form, so it has to stay cheap even for long visits over large catalogs.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use clinicdb::models::{DefaultMaterial, Material, Procedure};
use clinicdb::{MaterialCatalog, ProcedureCatalog, ProcedureSelection, VisitComposer};

fn catalogs(procedures: u64, materials: u64) -> (ProcedureCatalog, MaterialCatalog) {
    let now = Utc::now();
    let procedure_list = (1..=procedures).map(|id| Procedure {
        id,
        name: format!("Procedimento {}", id),
        description: None,
        default_price: 50.0 + id as f64,
        active: true,
        registered_at: now,
        default_materials: (0..5)
            .map(|k| DefaultMaterial {
                material_id: (id * 7 + k) % materials + 1,
                default_quantity: 1.0 + k as f64,
            })
            .collect(),
    });
    let material_list = (1..=materials).map(|id| Material {
        id,
        name: format!("Material {}", id),
        description: None,
        available_quantity: 1000.0,
        unit: "un".to_string(),
        unit_price: 0.5 * id as f64,
        minimum_stock: 10.0,
        active: true,
        registered_at: now,
    });
    (ProcedureCatalog::new(procedure_list), MaterialCatalog::new(material_list))
}

/// Full composition for visits of growing length over a 500-procedure catalog.
fn bench_compose(c: &mut Criterion) {
    let (procedures, materials) = catalogs(500, 200);
    let mut group = c.benchmark_group("compose");

    for size in [1usize, 10, 100] {
        let selections: Vec<ProcedureSelection> = (0..size)
            .map(|i| ProcedureSelection::new((i as u64 * 13) % 500 + 1))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &selections, |b, selections| {
            b.iter(|| VisitComposer::compose(black_box(selections), black_box(&procedures), black_box(&materials)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compose);
criterion_main!(benches);

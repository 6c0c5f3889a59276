//! Hot-path benchmarks: is_instance and vtable lookup

use argot_core::types::registry::TypeTable;
use argot_core::value::type_index;
use argot_core::vtable::VTable;
use argot_core::Any;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_is_instance(c: &mut Criterion) {
    let table = TypeTable::global();
    let animal = table
        .register(type_index::OBJECT, "bench.Animal", None)
        .unwrap();
    let dog = table
        .register(animal.type_index(), "bench.Dog", None)
        .unwrap();
    let rock = table
        .register(type_index::OBJECT, "bench.Rock", None)
        .unwrap();

    c.bench_function("is_instance_hit", |b| {
        b.iter(|| table.is_instance(black_box(dog.type_index()), black_box(animal.type_index())))
    });
    c.bench_function("is_instance_miss", |b| {
        b.iter(|| table.is_instance(black_box(dog.type_index()), black_box(rock.type_index())))
    });
}

fn bench_vtable_get(c: &mut Criterion) {
    let table = TypeTable::global();
    let base = table
        .register(type_index::OBJECT, "bench.vt.Base", None)
        .unwrap();
    let leaf = table
        .register(base.type_index(), "bench.vt.Leaf", None)
        .unwrap();
    let vt = VTable::global();
    vt.set(base.type_index(), "__str__", Any::int(1)).unwrap();

    c.bench_function("vtable_get_ancestor", |b| {
        b.iter(|| vt.get(black_box(leaf.type_index()), black_box("__str__")))
    });
}

criterion_group!(benches, bench_is_instance, bench_vtable_get);
criterion_main!(benches);

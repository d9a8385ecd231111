//! Dispatch Performance Benchmarks
//!
//! Measures the call-site fast path against the full resolution path:
//!
//! 1. **Monomorphic hit**: guard test + invoke, the steady state
//! 2. **Polymorphic hit**: front-to-back guard chain walk
//! 3. **Megamorphic call**: full re-resolution on every call
//! 4. **Cold resolution**: first-call cost at a fresh site

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use vela_core::types::TypeRegistry;
use vela_core::value::{FunctionRef, Value};
use vela_runtime::module::{CallableDecl, ModuleDef, ModuleRegistry};
use vela_vm::callsite::CallSiteId;
use vela_vm::descriptor::InvocationDescriptor;
use vela_vm::dispatch::{DispatchConfig, Dispatcher};

// =============================================================================
// Benchmark Helpers
// =============================================================================

/// Dispatcher with an `Any` augmentation so every receiver resolves.
fn dispatcher() -> Dispatcher {
    let types = Arc::new(TypeRegistry::new());
    let modules = Arc::new(ModuleRegistry::new());
    modules.register(ModuleDef::new("bench.main").with_augmentation(
        "Any",
        vec![CallableDecl::public(FunctionRef::untyped("poke", 1, |_| {
            Ok(Value::Int(1))
        }))],
    ));
    Dispatcher::new(types, modules)
}

fn receivers() -> Vec<Value> {
    vec![
        Value::Int(1),
        Value::str("s"),
        Value::Bool(true),
        Value::Long(2),
        Value::Double(3.0),
        Value::Float(4.0),
        Value::array(vec![]),
    ]
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_monomorphic_hit(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let descriptor = InvocationDescriptor::method("poke", 1, "bench.main");
    let id = CallSiteId(1);
    let receiver = Value::Int(7);
    dispatcher
        .resolve_and_cache(id, &descriptor, &[receiver.clone()])
        .unwrap();

    c.bench_function("monomorphic_hit", |b| {
        b.iter(|| {
            dispatcher
                .resolve_and_cache(id, &descriptor, black_box(&[receiver.clone()]))
                .unwrap()
        })
    });
}

fn bench_polymorphic_hit(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let descriptor = InvocationDescriptor::method("poke", 1, "bench.main");
    let id = CallSiteId(1);
    let receivers = &receivers()[..4];
    for receiver in receivers {
        dispatcher
            .resolve_and_cache(id, &descriptor, &[receiver.clone()])
            .unwrap();
    }
    // the deepest guard in the chain
    let last = receivers[3].clone();

    c.bench_function("polymorphic_last_guard_hit", |b| {
        b.iter(|| {
            dispatcher
                .resolve_and_cache(id, &descriptor, black_box(&[last.clone()]))
                .unwrap()
        })
    });
}

fn bench_megamorphic_call(c: &mut Criterion) {
    let dispatcher = {
        let types = Arc::new(TypeRegistry::new());
        let modules = Arc::new(ModuleRegistry::new());
        modules.register(ModuleDef::new("bench.main").with_augmentation(
            "Any",
            vec![CallableDecl::public(FunctionRef::untyped("poke", 1, |_| {
                Ok(Value::Int(1))
            }))],
        ));
        Dispatcher::with_config(
            types,
            modules,
            DispatchConfig {
                max_polymorphic_depth: 2,
            },
        )
    };
    let descriptor = InvocationDescriptor::method("poke", 1, "bench.main");
    let id = CallSiteId(1);
    for receiver in &receivers()[..3] {
        dispatcher
            .resolve_and_cache(id, &descriptor, &[receiver.clone()])
            .unwrap();
    }
    let receiver = Value::Int(7);

    c.bench_function("megamorphic_call", |b| {
        b.iter(|| {
            dispatcher
                .resolve_and_cache(id, &descriptor, black_box(&[receiver.clone()]))
                .unwrap()
        })
    });
}

fn bench_cold_resolution(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let descriptor = InvocationDescriptor::method("poke", 1, "bench.main");
    let receiver = Value::Int(7);
    let mut next_id = 1_000u32;

    c.bench_function("cold_resolution", |b| {
        b.iter(|| {
            next_id += 1;
            dispatcher
                .resolve_and_cache(
                    CallSiteId(next_id),
                    &descriptor,
                    black_box(&[receiver.clone()]),
                )
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_monomorphic_hit,
    bench_polymorphic_hit,
    bench_megamorphic_call,
    bench_cold_resolution
);
criterion_main!(benches);

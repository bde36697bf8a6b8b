use criterion::{criterion_group, criterion_main, Criterion};
use rigconf_core::{Manager, ManagerConfig, ResourceDiff};
use rigconf_runtime::{ParamTree, SimRegistry};
use rigconf_schema::{parse_definitions, Strictness};
use std::collections::BTreeSet;
use std::fmt::Write;
use std::hint::black_box;
use std::sync::Arc;

/// A parameter tree with `count` configurations over `count` resources, each
/// configuration using two neighbouring resources with two controllers each.
fn create_params(count: usize) -> String {
    let mut out = String::new();
    for r in 0..count {
        let _ = writeln!(out, "[hw{r}]\n[hw{r}.ctl_a]\n[hw{r}.ctl_b]");
    }
    for c in 0..count {
        let _ = writeln!(out, "[[control_configurations]]\nname = \"cfg{c}\"");
        for r in [c, (c + 1) % count] {
            for ctl in ["ctl_a", "ctl_b"] {
                let _ = writeln!(
                    out,
                    "[[control_configurations.components]]\nhardware_interface = \"hw{r}\"\ncontroller = \"{ctl}\""
                );
            }
        }
    }
    out
}

fn bench_parse_definitions(c: &mut Criterion) {
    let params = ParamTree::from_toml_str(&create_params(64)).unwrap();
    let raw = params.get("control_configurations").unwrap();
    c.bench_function("catalog_parse_64_configurations", |b| {
        b.iter(|| parse_definitions(black_box(&raw)).unwrap());
    });
}

fn bench_resource_diff(c: &mut Criterion) {
    let active: BTreeSet<String> = (0..200).map(|i| format!("hw{i}")).collect();
    let target: BTreeSet<String> = (100..300).map(|i| format!("hw{i}")).collect();
    c.bench_function("resource_diff_200x200", |b| {
        b.iter(|| ResourceDiff::compute(black_box(&active), black_box(&target)));
    });
}

fn bench_start_stop_cycle(c: &mut Criterion) {
    let registry = Arc::new(SimRegistry::new());
    let params = Arc::new(ParamTree::from_toml_str(&create_params(8)).unwrap());
    let manager = Manager::new(registry.clone(), params, ManagerConfig::default()).unwrap();
    c.bench_function("manager_start_switch_stop", |b| {
        b.iter(|| {
            manager.start("cfg0", Strictness::Strict).unwrap();
            manager.start("cfg1", Strictness::Strict).unwrap();
            manager.stop(Strictness::Strict).unwrap();
            registry.clear_calls();
        });
    });
}

criterion_group!(
    benches,
    bench_parse_definitions,
    bench_resource_diff,
    bench_start_stop_cycle
);
criterion_main!(benches);

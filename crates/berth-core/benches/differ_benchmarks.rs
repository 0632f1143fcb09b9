use berth_core::{
    normalize_locator, packages_to_install, plan_sync, AddOptions, Collaborators, DesiredPackage,
    Engine, EngineOptions,
};
use berth_remote::{InMemoryCache, InMemoryIndex, RecordingInstaller};
use berth_runtime::{BuiltinPlugins, FlakeGenerator, MockBackend, ProfileItem};
use berth_schema::{Locator, StorePath};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;

fn desired(n: usize) -> Vec<DesiredPackage> {
    (0..n)
        .map(|i| {
            DesiredPackage::new(
                format!("pkg{i}@1.0"),
                &Locator::new(format!("github:NixOS/nixpkgs/rev1#pkg{i}")),
                vec![StorePath::new(format!("/nix/store/{i:032}-pkg{i}-1.0"))],
            )
        })
        .collect()
}

/// Every other desired package is already installed, spelled differently.
fn installed(n: usize) -> Vec<ProfileItem> {
    (0..n)
        .step_by(2)
        .enumerate()
        .map(|(index, i)| ProfileItem {
            index,
            name: format!("pkg{i}"),
            locator: Some(Locator::new(format!(
                "github:nixos/nixpkgs/rev1#legacyPackages.x86_64-linux.pkg{i}"
            ))),
            store_paths: vec![StorePath::new(format!("/nix/store/{i:032}-pkg{i}-1.0"))],
        })
        .collect()
}

fn bench_packages_to_install(c: &mut Criterion) {
    let mut group = c.benchmark_group("packages_to_install");
    for n in [10, 100, 1000] {
        let want = desired(n);
        let items = installed(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| packages_to_install(black_box(&want), black_box(&items)).len());
        });
    }
    group.finish();
}

fn bench_plan_sync(c: &mut Criterion) {
    let wanted: Vec<StorePath> = desired(1000)
        .into_iter()
        .flat_map(|d| d.store_paths)
        .collect();
    let items = installed(1000);
    c.bench_function("plan_sync_1000", |b| {
        b.iter(|| plan_sync(black_box(&wanted), black_box(&items)));
    });
}

fn bench_normalize_locator(c: &mut Criterion) {
    c.bench_function("normalize_locator", |b| {
        b.iter(|| {
            normalize_locator(black_box(
                "github:NixOS/nixpkgs/rev1?narHash=sha256-x#legacyPackages.x86_64-linux.go_1_21",
            ))
        });
    });
}

fn bench_ensure_unchanged(c: &mut Criterion) {
    c.bench_function("engine_ensure_unchanged", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let collab = Collaborators {
                    index: Arc::new(InMemoryIndex::new()),
                    cache: Arc::new(InMemoryCache::new()),
                    releases: Arc::new(RecordingInstaller::new()),
                    package_manager: Arc::new(MockBackend::new()),
                    plugins: Arc::new(BuiltinPlugins::new()),
                    env_generator: Arc::new(FlakeGenerator::new()),
                };
                let mut engine =
                    Engine::open(dir.path(), collab, EngineOptions::default()).unwrap();
                let names: Vec<String> = (0..20).map(|i| format!("tool{i}")).collect();
                engine.add(&names, &AddOptions::default()).unwrap();
                engine.install().unwrap();
                (dir, engine)
            },
            |(_dir, mut engine)| {
                assert!(engine.install().unwrap().up_to_date);
            },
        );
    });
}

criterion_group!(
    benches,
    bench_packages_to_install,
    bench_plan_sync,
    bench_normalize_locator,
    bench_ensure_unchanged,
);
criterion_main!(benches);

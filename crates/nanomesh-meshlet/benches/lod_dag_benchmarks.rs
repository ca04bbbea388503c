//! LOD DAG Benchmarks
//!
//! Level-0 clustering and full DAG builds over procedural grids

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nanomesh_core::math::{Vec2, Vec3};
use nanomesh_meshlet::{IndexedMesh, LodDagBuilder, MeshletBuildConfig, build_meshlet_batch};

fn wavy_grid(n: u32) -> IndexedMesh {
    let mut mesh = IndexedMesh::default();
    for y in 0..=n {
        for x in 0..=n {
            let (fx, fy) = (x as f32, y as f32);
            mesh.positions.push(Vec3::new(fx, fy, 0.5 * (fx * 0.2).sin() * (fy * 0.2).cos()));
            mesh.normals.push(Vec3::Z);
            mesh.uvs.push(Vec2::new(fx, fy) / n as f32);
        }
    }
    let row = n + 1;
    for y in 0..n {
        for x in 0..n {
            let i = y * row + x;
            mesh.indices.extend_from_slice(&[i, i + 1, i + row, i + 1, i + row + 1, i + row]);
        }
    }
    mesh
}

fn bench_level_zero(c: &mut Criterion) {
    let mut group = c.benchmark_group("level_zero_meshlets");
    let config = MeshletBuildConfig::default();

    for n in [32, 128].iter() {
        let mesh = wavy_grid(*n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &mesh, |b, mesh| {
            b.iter(|| black_box(build_meshlet_batch(&mesh.indices, &mesh.positions, &config).unwrap()));
        });
    }

    group.finish();
}

fn bench_full_dag(c: &mut Criterion) {
    let mut group = c.benchmark_group("lod_dag");
    group.sample_size(10);

    for parallel in [false, true] {
        let mesh = wavy_grid(96);
        let config = MeshletBuildConfig {
            parallel_groups: parallel,
            ..Default::default()
        };
        let label = if parallel { "parallel" } else { "serial" };
        group.bench_function(label, |b| {
            b.iter(|| {
                let mut builder = LodDagBuilder::new(&mesh, &config).unwrap();
                black_box(builder.build().unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_level_zero, bench_full_dag);

criterion_main!(benches);

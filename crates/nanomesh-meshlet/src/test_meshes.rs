//! Procedural meshes shared by the unit tests and benchmarks

use nanomesh_core::math::{Vec2, Vec3};

use crate::normalize::{IndexedMesh, RawMesh};

/// Axis-aligned cube of side `size` centred on the origin, 8 shared vertices
pub fn cube(size: f32) -> IndexedMesh {
    let h = size * 0.5;
    let positions: Vec<Vec3> = (0..8)
        .map(|i| {
            Vec3::new(
                if i & 1 == 0 { -h } else { h },
                if i & 2 == 0 { -h } else { h },
                if i & 4 == 0 { -h } else { h },
            )
        })
        .collect();
    let indices = vec![
        0, 2, 1, 1, 2, 3, // -z
        4, 5, 6, 5, 7, 6, // +z
        0, 1, 4, 1, 5, 4, // -y
        2, 6, 3, 3, 6, 7, // +y
        0, 4, 2, 2, 4, 6, // -x
        1, 3, 5, 3, 7, 5, // +x
    ];
    IndexedMesh {
        normals: positions.iter().map(|p| p.normalize()).collect(),
        uvs: positions.iter().map(|p| Vec2::new(p.x, p.y)).collect(),
        positions,
        indices,
    }
}

/// Gently curved `n` x `n` quad grid (2 n^2 triangles)
pub fn grid(n: u32) -> IndexedMesh {
    let mut mesh = IndexedMesh::default();
    for y in 0..=n {
        for x in 0..=n {
            let (fx, fy) = (x as f32, y as f32);
            let height = 0.25 * (fx * 0.3).sin() * (fy * 0.3).cos();
            mesh.positions.push(Vec3::new(fx, fy, height));
            mesh.normals.push(Vec3::new(-0.05 * (fx * 0.3).cos(), 0.05 * (fy * 0.3).sin(), 1.0).normalize());
            mesh.uvs.push(Vec2::new(fx / n as f32, fy / n as f32));
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

/// Single triangle
pub fn triangle() -> IndexedMesh {
    IndexedMesh {
        positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
        normals: vec![Vec3::Z; 3],
        uvs: vec![Vec2::ZERO, Vec2::X, Vec2::Y],
        indices: vec![0, 1, 2],
    }
}

/// Wrap an indexed mesh as importer output
pub fn to_raw(mesh: IndexedMesh) -> RawMesh {
    RawMesh {
        positions: mesh.positions,
        normals: mesh.normals,
        uvs: mesh.uvs,
        indices: Some(mesh.indices),
    }
}

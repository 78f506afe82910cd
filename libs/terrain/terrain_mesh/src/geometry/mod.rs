// This file is part of Relief.
//
// Relief is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Relief is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Relief.  If not, see <http://www.gnu.org/licenses/>.
use log::warn;
use nalgebra::Vector3;
use throttle::{Promise, WorkerPool};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Shading {
    /// Indexed output with per-vertex normals averaged over incident faces.
    Smooth,
    /// De-indexed output with one normal per triangle.
    Flat,
}

/// Buffers handed to the processor. Ownership moves in; the processed
/// buffers move back.
#[derive(Clone, Debug)]
pub struct GeometryInput {
    pub positions: Vec<f32>,
    pub colors: Vec<f32>,
    pub indices: Vec<u16>,
}

#[derive(Clone, Debug)]
pub struct ProcessedGeometry {
    pub positions: Vec<f32>,
    pub colors: Vec<f32>,
    pub normals: Vec<f32>,
    pub indices: Option<Vec<u16>>,
}

// Computes shaded geometry either inline on the caller's thread (zero
// dedicated threads) or on a pool of workers created on first dispatch.
pub struct GeometryProcessor {
    shading: Shading,
    dedicated_threads: usize,
    pool: Option<WorkerPool<GeometryInput, ProcessedGeometry>>,
}

impl GeometryProcessor {
    pub fn new(shading: Shading, dedicated_threads: usize) -> Self {
        Self {
            shading,
            dedicated_threads,
            pool: None,
        }
    }

    pub fn shading(&self) -> Shading {
        self.shading
    }

    pub fn process(&mut self, input: GeometryInput) -> Promise<ProcessedGeometry> {
        if self.dedicated_threads == 0 {
            return Promise::ready(process_geometry(self.shading, input));
        }
        if self.pool.is_none() {
            let shading = self.shading;
            match WorkerPool::new("geometry", self.dedicated_threads, move |job| {
                process_geometry(shading, job)
            }) {
                Ok(pool) => self.pool = Some(pool),
                Err(e) => {
                    warn!("geometry worker pool unavailable, processing inline: {}", e);
                    self.dedicated_threads = 0;
                    return Promise::ready(process_geometry(self.shading, input));
                }
            }
        }
        self.pool.as_ref().unwrap().dispatch(input)
    }
}

fn process_geometry(shading: Shading, input: GeometryInput) -> ProcessedGeometry {
    match shading {
        Shading::Smooth => compute_smooth(input),
        Shading::Flat => compute_flat(input),
    }
}

fn vertex(positions: &[f32], index: usize) -> Vector3<f32> {
    Vector3::new(
        positions[3 * index],
        positions[3 * index + 1],
        positions[3 * index + 2],
    )
}

fn face_normal(positions: &[f32], i1: usize, i2: usize, i3: usize) -> Vector3<f32> {
    let v1 = vertex(positions, i1);
    let v2 = vertex(positions, i2);
    let v3 = vertex(positions, i3);
    (v3 - v2).cross(&(v2 - v1))
}

// Sum face normals into every referenced vertex, then normalise. Vertices
// touched only by degenerate triangles keep a zero normal.
fn compute_smooth(input: GeometryInput) -> ProcessedGeometry {
    let mut normals = vec![0f32; input.positions.len()];
    for tri in input.indices.chunks(3) {
        let (i1, i2, i3) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        let face = face_normal(&input.positions, i1, i2, i3);
        for &i in &[i1, i2, i3] {
            normals[3 * i] += face.x;
            normals[3 * i + 1] += face.y;
            normals[3 * i + 2] += face.z;
        }
    }
    for normal in normals.chunks_mut(3) {
        let v = Vector3::new(normal[0], normal[1], normal[2]);
        let length = v.norm();
        if length > 0.0 {
            normal[0] = v.x / length;
            normal[1] = v.y / length;
            normal[2] = v.z / length;
        }
    }
    ProcessedGeometry {
        positions: input.positions,
        colors: input.colors,
        normals,
        indices: Some(input.indices),
    }
}

// Expand into per-triangle vertices and assign each triangle's unit normal
// to all three of them.
fn compute_flat(input: GeometryInput) -> ProcessedGeometry {
    let count = input.indices.len();
    let mut positions = Vec::with_capacity(3 * count);
    let mut colors = Vec::with_capacity(3 * count);
    let mut normals = Vec::with_capacity(3 * count);
    for tri in input.indices.chunks(3) {
        let (i1, i2, i3) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        for &i in &[i1, i2, i3] {
            positions.extend_from_slice(&input.positions[3 * i..3 * i + 3]);
            colors.extend_from_slice(&input.colors[3 * i..3 * i + 3]);
        }
        let mut face = face_normal(&input.positions, i1, i2, i3);
        let length = face.norm();
        if length > 0.0 {
            face /= length;
        }
        for _ in 0..3 {
            normals.extend_from_slice(&[face.x, face.y, face.z]);
        }
    }
    ProcessedGeometry {
        positions,
        colors,
        normals,
        indices: None,
    }
}

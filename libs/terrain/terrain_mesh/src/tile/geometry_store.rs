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

// Topology shared by every patch with the same quad count N:
//   * a positions template, the (N+1)x(N+1) grid of integer XZ at Y=0;
//   * corner and per-side vertex index lists;
//   * one index buffer per simple/decimated edge combination, generated on
//     first use and cached.
//
// Grid indexing is Z-flipped: the vertex at grid (x, z) lives at buffer
// index x + (N - z)(N + 1), so "up" (larger Z) is storage row 0. Index
// generation works entirely in storage rows; the winding below comes out
// counter-clockwise seen from -Y, which is what the normal convention
// n = (v3 - v2) x (v2 - v1) needs to point toward +Y.

use crate::patch::{EdgeResolution, EdgesResolution};
use anyhow::{ensure, Result};
use parking_lot::Mutex;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CornerIndices {
    pub up_left: u16,
    pub up_right: u16,
    pub down_left: u16,
    pub down_right: u16,
}

/// Ordered vertex indices of the four sides. `up`/`down` run by increasing
/// X; `left`/`right` run from the up side to the down side.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EdgeIndexLists {
    pub up: Vec<u16>,
    pub down: Vec<u16>,
    pub left: Vec<u16>,
    pub right: Vec<u16>,
}

/// One edge combination's topology, cloned out of the store so the caller
/// may mutate freely.
#[derive(Clone, Debug)]
pub struct TileIndices {
    pub buffer: Vec<u16>,
    pub corners: CornerIndices,
    pub edges: EdgeIndexLists,
}

pub struct TileGeometryStore {
    quads_per_side: usize,
    positions: Vec<f32>,
    corners: CornerIndices,
    edges: EdgeIndexLists,
    index_buffers: Mutex<[Option<Vec<u16>>; 16]>,
}

impl TileGeometryStore {
    pub fn new(base_patch_size: u32, step: u32) -> Result<Self> {
        ensure!(step > 0, "step must be positive");
        ensure!(
            base_patch_size > 0 && base_patch_size % step == 0,
            "step {} must divide base patch size {}",
            step,
            base_patch_size
        );
        let n = (base_patch_size / step) as usize;
        ensure!(n % 2 == 0, "decimated edges require an even quad count");
        ensure!(n >= 4, "a patch needs an interior ring, got {} quads", n);
        ensure!(
            n + 1 <= 256,
            "{}x{} vertices exceed the u16 index space",
            n + 1,
            n + 1
        );

        let verts = n + 1;
        let mut positions = Vec::with_capacity(3 * verts * verts);
        for r in 0..verts {
            for x in 0..verts {
                positions.push(x as f32);
                positions.push(0f32);
                positions.push((n - r) as f32);
            }
        }

        let idx = |x: usize, r: usize| (x + r * verts) as u16;
        let corners = CornerIndices {
            up_left: idx(0, 0),
            up_right: idx(n, 0),
            down_left: idx(0, n),
            down_right: idx(n, n),
        };
        let edges = EdgeIndexLists {
            up: (0..verts).map(|x| idx(x, 0)).collect(),
            down: (0..verts).map(|x| idx(x, n)).collect(),
            left: (0..verts).map(|r| idx(0, r)).collect(),
            right: (0..verts).map(|r| idx(n, r)).collect(),
        };

        Ok(Self {
            quads_per_side: n,
            positions,
            corners,
            edges,
            index_buffers: Mutex::new(std::array::from_fn(|_| None)),
        })
    }

    pub fn quads_per_side(&self) -> usize {
        self.quads_per_side
    }

    pub fn vertices_per_side(&self) -> usize {
        self.quads_per_side + 1
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices_per_side() * self.vertices_per_side()
    }

    /// A fresh copy of the positions template.
    pub fn clone_positions_buffer(&self) -> Vec<f32> {
        self.positions.clone()
    }

    pub fn corners(&self) -> CornerIndices {
        self.corners
    }

    pub fn edge_index_lists(&self) -> &EdgeIndexLists {
        &self.edges
    }

    /// The topology for one edge combination. Buffers are generated once
    /// per distinct combination; the returned copy is the caller's.
    pub fn get_indices(&self, edges_resolution: EdgesResolution) -> TileIndices {
        let mut cache = self.index_buffers.lock();
        let slot = &mut cache[edges_resolution.key()];
        if slot.is_none() {
            *slot = Some(self.generate_indices(edges_resolution));
        }
        TileIndices {
            buffer: slot.as_ref().unwrap().clone(),
            corners: self.corners,
            edges: self.edges.clone(),
        }
    }

    fn generate_indices(&self, edges_resolution: EdgesResolution) -> Vec<u16> {
        let n = self.quads_per_side;
        let verts = n + 1;
        let tris = |r: EdgeResolution| match r {
            EdgeResolution::Simple => 2 * n - 2,
            EdgeResolution::Decimated => 3 * n / 2 - 2,
        };
        let total = 2 * (n - 2) * (n - 2)
            + tris(edges_resolution.up)
            + tris(edges_resolution.down)
            + tris(edges_resolution.left)
            + tris(edges_resolution.right);
        let mut out = Vec::with_capacity(3 * total);

        // Interior strip, identical for all sixteen combinations.
        let idx = |x: usize, r: usize| (x + r * verts) as u16;
        for r in 1..n - 1 {
            for x in 1..n - 1 {
                let mm = idx(x, r);
                let pm = idx(x + 1, r);
                let mp = idx(x, r + 1);
                let pp = idx(x + 1, r + 1);
                out.extend_from_slice(&[mm, pp, pm]);
                out.extend_from_slice(&[mm, mp, pp]);
            }
        }

        // The ring between each side and the interior. The inner starting
        // index matches the side's second vertex, one row in.
        self.push_edge_strip(&mut out, edges_resolution.up, 0, 1, verts + 1, 1, true);
        self.push_edge_strip(
            &mut out,
            edges_resolution.down,
            n * verts,
            1,
            (n - 1) * verts + 1,
            1,
            false,
        );
        self.push_edge_strip(&mut out, edges_resolution.left, 0, verts, verts + 1, verts, false);
        self.push_edge_strip(
            &mut out,
            edges_resolution.right,
            n,
            verts,
            2 * verts - 2,
            verts,
            true,
        );

        debug_assert_eq!(out.len(), 3 * total);
        out
    }

    fn push_edge_strip(
        &self,
        out: &mut Vec<u16>,
        resolution: EdgeResolution,
        edge_start: usize,
        edge_step: usize,
        inner_start: usize,
        inner_step: usize,
        invert: bool,
    ) {
        let n = self.quads_per_side;
        let e = |i: usize| (edge_start + i * edge_step) as u16;
        let m = |j: usize| (inner_start + j * inner_step) as u16;
        let mut emit = |a: u16, b: u16, c: u16| {
            if invert {
                out.extend_from_slice(&[a, c, b]);
            } else {
                out.extend_from_slice(&[a, b, c]);
            }
        };
        match resolution {
            EdgeResolution::Simple => {
                emit(e(0), e(1), m(0));
                for i in 1..n - 1 {
                    emit(e(i), e(i + 1), m(i));
                    emit(e(i), m(i), m(i - 1));
                }
                emit(e(n - 1), e(n), m(n - 2));
            }
            EdgeResolution::Decimated => {
                emit(e(0), e(2), m(0));
                for k in 1..n / 2 {
                    emit(e(2 * k), m(2 * k - 1), m(2 * k - 2));
                    emit(e(2 * k), m(2 * k), m(2 * k - 1));
                    emit(e(2 * k), e(2 * k + 2), m(2 * k));
                }
            }
        }
    }
}

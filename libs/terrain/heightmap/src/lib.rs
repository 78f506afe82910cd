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
use anyhow::{ensure, Result};
use throttle::Promise;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AltitudeRange {
    pub min: f32,
    pub max: f32,
}

// Parallel sample buffers for one batch of world coordinates: altitude and
// material id per coordinate pair. Per-sample records mixing the two are
// not representable on purpose.
#[derive(Clone, Debug, Default)]
pub struct HeightmapSamples {
    pub altitudes: Vec<f32>,
    pub material_ids: Vec<u32>,
}

impl HeightmapSamples {
    pub fn new(altitudes: Vec<f32>, material_ids: Vec<u32>) -> Result<Self> {
        ensure!(
            altitudes.len() == material_ids.len(),
            "altitude and material buffers must be parallel"
        );
        Ok(Self {
            altitudes,
            material_ids,
        })
    }

    pub fn len(&self) -> usize {
        self.altitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.altitudes.is_empty()
    }
}

/// Source of terrain altitudes and materials. `coordinates` is a packed
/// buffer of interleaved `(x, z)` world positions; the resolved samples are
/// parallel to it. Sampling may complete on a later tick and may fail with
/// a retryable error; retries are the caller's responsibility.
pub trait Heightmap: Send + Sync {
    fn altitude_range(&self) -> AltitudeRange;
    fn sample(&self, coordinates: Vec<f32>) -> Promise<Result<HeightmapSamples>>;
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VoxelMaterial {
    pub color: Rgb,
}

/// Maps material ids to render colors, normalized to `[0, 1]`.
pub trait MaterialsStore: Send + Sync {
    fn voxel_material(&self, material_id: u32) -> VoxelMaterial;
}

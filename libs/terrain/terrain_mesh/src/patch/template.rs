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
use crate::{patch::PatchId, tile::TileGeometryStore};
use anyhow::Result;
use heightmap::{Heightmap, HeightmapSamples, MaterialsStore};
use log::warn;
use std::sync::Arc;
use throttle::{AsyncTask, PromiseThrottler, TaskState};

/// Resolved per-patch samples: one altitude per vertex and material colors
/// already flattened to RGB triples.
pub(crate) struct PatchSamples {
    pub altitudes: Vec<f32>,
    pub colors: Vec<f32>,
}

enum SampleState {
    Requesting(AsyncTask<Result<HeightmapSamples>>),
    Resolved(PatchSamples),
    // The sampler rejected; the next tick re-requests.
    Failed,
}

// Cached per-patch inputs reused across every edge-code mesh variant: the
// positions template scaled to the patch's level, and the (possibly still
// pending) heightmap samples for those positions.
pub(crate) struct PatchTemplate {
    id: PatchId,
    world_origin: (f64, f64),
    positions: Vec<f32>,
    state: SampleState,
}

impl PatchTemplate {
    pub(crate) fn new(
        id: PatchId,
        store: &TileGeometryStore,
        base_patch_size: u32,
        step: u32,
        sampler: &Arc<dyn Heightmap>,
        throttler: &PromiseThrottler,
    ) -> Self {
        let scale = (step as u64 * (1u64 << id.level())) as f32;
        let mut positions = store.clone_positions_buffer();
        for vertex in positions.chunks_mut(3) {
            vertex[0] *= scale;
            vertex[2] *= scale;
        }
        let world_origin = id.world_origin(base_patch_size);
        let mut template = Self {
            id,
            world_origin,
            positions,
            state: SampleState::Failed,
        };
        template.state = SampleState::Requesting(template.request(sampler, throttler));
        template
    }

    fn request(
        &self,
        sampler: &Arc<dyn Heightmap>,
        throttler: &PromiseThrottler,
    ) -> AsyncTask<Result<HeightmapSamples>> {
        let coordinates: Vec<f32> = self
            .positions
            .chunks(3)
            .flat_map(|vertex| {
                [
                    (self.world_origin.0 + vertex[0] as f64) as f32,
                    (self.world_origin.1 + vertex[2] as f64) as f32,
                ]
            })
            .collect();
        let sampler = sampler.clone();
        let throttler = throttler.clone();
        let mut task = AsyncTask::new(move || throttler.run(move || sampler.sample(coordinates)));
        task.start();
        task
    }

    /// Scaled positions, Y = 0.
    pub(crate) fn positions(&self) -> &[f32] {
        &self.positions
    }

    pub(crate) fn samples(&self) -> Option<&PatchSamples> {
        match &self.state {
            SampleState::Resolved(samples) => Some(samples),
            _ => None,
        }
    }

    /// Re-issue the sample request after a failure.
    pub(crate) fn ensure_requested(
        &mut self,
        sampler: &Arc<dyn Heightmap>,
        throttler: &PromiseThrottler,
    ) {
        if matches!(self.state, SampleState::Failed) {
            self.state = SampleState::Requesting(self.request(sampler, throttler));
        }
    }

    /// Drive a pending request; on arrival, resolve materials to colors.
    pub(crate) fn poll(&mut self, materials: &Arc<dyn MaterialsStore>) {
        let task = match &mut self.state {
            SampleState::Requesting(task) => task,
            _ => return,
        };
        if task.poll() != TaskState::Finished {
            return;
        }
        let expected = self.positions.len() / 3;
        let resolved = match task.take_result() {
            Some(Ok(samples)) if samples.len() == expected => {
                let colors = samples
                    .material_ids
                    .iter()
                    .flat_map(|&id| {
                        let color = materials.voxel_material(id).color;
                        [color.r, color.g, color.b]
                    })
                    .collect();
                SampleState::Resolved(PatchSamples {
                    altitudes: samples.altitudes,
                    colors,
                })
            }
            Some(Ok(samples)) => {
                warn!(
                    "sampler returned {} samples for {} vertices of {}",
                    samples.len(),
                    expected,
                    self.id
                );
                SampleState::Failed
            }
            Some(Err(e)) => {
                warn!("sampling {} failed: {}", self.id, e);
                SampleState::Failed
            }
            None => {
                warn!("sampling {} cancelled", self.id);
                SampleState::Failed
            }
        };
        self.state = resolved;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use heightmap::{AltitudeRange, Rgb, VoxelMaterial};
    use throttle::Promise;

    struct PlaneSampler;

    impl Heightmap for PlaneSampler {
        fn altitude_range(&self) -> AltitudeRange {
            AltitudeRange { min: 0.0, max: 0.0 }
        }

        fn sample(&self, coordinates: Vec<f32>) -> Promise<Result<HeightmapSamples>> {
            let count = coordinates.len() / 2;
            Promise::ready(HeightmapSamples::new(vec![0.0; count], vec![7; count]))
        }
    }

    struct OneMaterial;

    impl MaterialsStore for OneMaterial {
        fn voxel_material(&self, material_id: u32) -> VoxelMaterial {
            assert_eq!(material_id, 7);
            VoxelMaterial {
                color: Rgb {
                    r: 0.25,
                    g: 0.5,
                    b: 1.0,
                },
            }
        }
    }

    #[test]
    fn test_template_scales_and_resolves() {
        let store = TileGeometryStore::new(64, 16).unwrap();
        let sampler: Arc<dyn Heightmap> = Arc::new(PlaneSampler);
        let materials: Arc<dyn MaterialsStore> = Arc::new(OneMaterial);
        let throttler = PromiseThrottler::new(4).unwrap();
        let id = PatchId::new(1, 1, 0);
        let mut template = PatchTemplate::new(id, &store, 64, 16, &sampler, &throttler);

        // Scale is step * 2^level = 32; the up-left vertex sits at z = N*32.
        assert_eq!(&template.positions()[0..3], &[0.0, 0.0, 128.0]);
        assert!(template.samples().is_none());

        template.poll(&materials);
        let samples = template.samples().expect("synchronous sampler resolved");
        assert_eq!(samples.altitudes.len(), store.vertex_count());
        assert_eq!(samples.colors.len(), 3 * store.vertex_count());
        assert_eq!(&samples.colors[0..3], &[0.25, 0.5, 1.0]);
    }
}

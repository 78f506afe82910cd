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
use crate::{
    geometry::{GeometryProcessor, Shading},
    mesh::PatchMesh,
    patch::{PatchId, PatchNode, UpdateContext},
    quad_tree::QuadTree,
    tile::TileGeometryStore,
};
use anyhow::{ensure, Result};
use fxhash::FxHashMap;
use heightmap::{Heightmap, MaterialsStore};
use log::trace;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use throttle::PromiseThrottler;

#[derive(Clone, Debug)]
pub struct ViewerOptions {
    /// Side of a finest (level 0) patch, world units.
    pub base_patch_size: u32,
    /// World units per quad step; must divide `base_patch_size`.
    pub step: u32,
    /// Levels of coarsening above the finest; the pyramid's top.
    pub max_level: u32,
    /// De-indexed, one-normal-per-triangle output.
    pub flat_shading: bool,
    /// Geometry workers; zero processes on the caller's thread.
    pub dedicated_threads: usize,
    /// Bound on outstanding sampler requests.
    pub max_concurrent_samplings: usize,
    pub garbage_collect_interval: Duration,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            base_patch_size: 64,
            step: 4,
            max_level: 2,
            flat_shading: false,
            dedicated_threads: 0,
            max_concurrent_samplings: 8,
            garbage_collect_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CountStatistics {
    pub loaded_count: usize,
    pub visible_count: usize,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Statistics {
    pub meshes: CountStatistics,
    pub triangles: CountStatistics,
    pub gpu_memory_bytes: usize,
}

// Root of the patch pyramid. Owns the top-level patches, rebuilds the
// visibility quadtree from the focus each tick, drives every patch's mesh
// pipeline, and garbage-collects what the camera left behind.
pub struct HeightmapViewer {
    options: ViewerOptions,
    store: TileGeometryStore,
    quad_tree: QuadTree,
    processor: GeometryProcessor,
    throttler: PromiseThrottler,
    sampler: Arc<dyn Heightmap>,
    materials: Arc<dyn MaterialsStore>,
    tops: FxHashMap<(i32, i32), PatchNode>,
    focus: (f64, f64),
    focus_distance: f64,
    visibility_distance: f64,
    wireframe: bool,
    hidden: Vec<PatchId>,
    last_gc: Instant,
}

impl HeightmapViewer {
    pub fn new(
        options: ViewerOptions,
        sampler: Arc<dyn Heightmap>,
        materials: Arc<dyn MaterialsStore>,
    ) -> Result<Self> {
        ensure!(options.max_level <= 24, "patch pyramid too tall");
        let store = TileGeometryStore::new(options.base_patch_size, options.step)?;
        let throttler = PromiseThrottler::new(options.max_concurrent_samplings)?;
        let shading = if options.flat_shading {
            Shading::Flat
        } else {
            Shading::Smooth
        };
        let processor = GeometryProcessor::new(shading, options.dedicated_threads);
        let quad_tree = QuadTree::new(options.max_level, options.base_patch_size);
        Ok(Self {
            options,
            store,
            quad_tree,
            processor,
            throttler,
            sampler,
            materials,
            tops: FxHashMap::default(),
            focus: (0.0, 0.0),
            focus_distance: 0.0,
            visibility_distance: 0.0,
            wireframe: false,
            hidden: Vec::new(),
            last_gc: Instant::now(),
        })
    }

    pub fn set_focus_point(&mut self, x: f64, z: f64) {
        self.focus = (x, z);
    }

    pub fn set_focus_distance(&mut self, distance: f64) {
        self.focus_distance = distance.max(0.0);
    }

    pub fn set_visibility_distance(&mut self, distance: f64) {
        self.visibility_distance = distance.max(0.0);
    }

    pub fn set_wireframe(&mut self, wireframe: bool) {
        self.wireframe = wireframe;
    }

    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    /// Hide the finest-level patches containing the given world positions.
    /// Takes effect immediately: the pyramid is subdivided down to each
    /// hidden patch, visibility reapplied and meshes updated.
    pub fn set_hidden_patches(&mut self, patches: impl IntoIterator<Item = (f64, f64)>) {
        let base = self.options.base_patch_size as f64;
        self.hidden = patches
            .into_iter()
            .map(|(x, z)| {
                PatchId::new(0, (x / base).floor() as i32, (z / base).floor() as i32)
            })
            .collect();
        self.apply_visibility();
        self.update_meshes();
    }

    /// Cooperative tick: reapply visibility, drive pending sampling and
    /// geometry work, collect garbage when the interval elapsed.
    pub fn update(&mut self) -> Result<()> {
        self.apply_visibility();
        self.update_meshes();
        self.garbage_collect();
        Ok(())
    }

    /// Meshes attached by the most recent pass, with their owning patches.
    pub fn visible_meshes(&self) -> Vec<(&PatchId, &PatchMesh)> {
        let mut out = Vec::new();
        for top in self.tops.values() {
            top.visit_attached(&mut |id, mesh| out.push((id, mesh)));
        }
        out
    }

    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics::default();
        for top in self.tops.values() {
            top.visit_loaded(&mut |mesh| {
                if !mesh.is_disposed() {
                    stats.meshes.loaded_count += 1;
                    stats.triangles.loaded_count += mesh.triangle_count();
                    stats.gpu_memory_bytes += mesh.byte_size();
                }
            });
            top.visit_attached(&mut |_, mesh| {
                stats.meshes.visible_count += 1;
                stats.triangles.visible_count += mesh.triangle_count();
            });
        }
        stats
    }

    fn top_size(&self) -> f64 {
        (self.options.base_patch_size as u64 * (1u64 << self.options.max_level)) as f64
    }

    fn base_patch_at(&self, x: f64, z: f64) -> PatchId {
        let base = self.options.base_patch_size as f64;
        PatchId::new(0, (x / base).floor() as i32, (z / base).floor() as i32)
    }

    // The visibility quadtree is rebuilt from scratch so no stale
    // subdivision from a previous focus can skew edge derivation; mesh
    // caches live in the patch nodes and survive untouched.
    fn apply_visibility(&mut self) {
        self.quad_tree = QuadTree::new(self.options.max_level, self.options.base_patch_size);
        self.quad_tree.apply_visibility(
            self.focus,
            self.focus_distance,
            self.visibility_distance,
            &self.hidden,
        );

        for top in self.tops.values_mut() {
            top.reset_subdivisions();
        }

        // Subdivide down to every focused base patch.
        let base = self.options.base_patch_size as f64;
        let focus = self.focus;
        let focus_distance = self.focus_distance;
        let lo = self.base_patch_at(focus.0 - focus_distance, focus.1 - focus_distance);
        let hi = self.base_patch_at(focus.0 + focus_distance, focus.1 + focus_distance);
        for y in lo.y()..=hi.y() {
            for x in lo.x()..=hi.x() {
                let id = PatchId::new(0, x, y);
                let (ox, oz) = id.world_origin(self.options.base_patch_size);
                let cx = ox + base / 2.0 - focus.0;
                let cz = oz + base / 2.0 - focus.1;
                if (cx * cx + cz * cz).sqrt() <= focus_distance {
                    self.subdivide_to(&id);
                }
            }
        }

        // Subdivide to the hidden patches and their stitching
        // neighbourhood, then hide them.
        let hidden = self.hidden.clone();
        for id in &hidden {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    self.subdivide_to(&id.neighbour(dx, dy));
                }
            }
            if let Some(node) = self.subdivide_to(id) {
                node.set_visible(false);
            }
        }

        // Only the ring of top patches around the focus is visible.
        let ring = if self.top_size() > 0.0 {
            (self.visibility_distance / self.top_size()).ceil() as i32
        } else {
            0
        };
        let centre = self
            .base_patch_at(focus.0, focus.1)
            .ancestor(self.options.max_level);
        for dy in -ring..=ring {
            for dx in -ring..=ring {
                let top = centre.neighbour(dx, dy);
                self.tops
                    .entry((top.x(), top.y()))
                    .or_insert_with(|| PatchNode::new(top));
            }
        }
        for (&(x, y), top) in self.tops.iter_mut() {
            let in_ring = (x - centre.x()).abs() <= ring && (y - centre.y()).abs() <= ring;
            top.set_visible(in_ring);
        }
    }

    fn subdivide_to(&mut self, id: &PatchId) -> Option<&mut PatchNode> {
        let top_id = id.ancestor(self.options.max_level);
        let top = self
            .tops
            .entry((top_id.x(), top_id.y()))
            .or_insert_with(|| PatchNode::new(top_id));
        top.get_or_build_sub_node(id, &mut self.quad_tree)
    }

    fn update_meshes(&mut self) {
        let mut ctx = UpdateContext {
            store: &self.store,
            quad_tree: &mut self.quad_tree,
            processor: &mut self.processor,
            sampler: &self.sampler,
            materials: &self.materials,
            throttler: &self.throttler,
            base_patch_size: self.options.base_patch_size,
            step: self.options.step,
        };
        for top in self.tops.values_mut() {
            top.update_mesh(&mut ctx);
        }
    }

    fn garbage_collect(&mut self) {
        if self.last_gc.elapsed() < self.options.garbage_collect_interval {
            return;
        }
        self.last_gc = Instant::now();
        let before = self.tops.len();
        self.tops.retain(|_, top| {
            if top.is_visible() {
                true
            } else {
                top.dispose();
                false
            }
        });
        for top in self.tops.values_mut() {
            top.garbage_collect();
        }
        if self.tops.len() != before {
            trace!("garbage collected {} top patches", before - self.tops.len());
        }
    }
}

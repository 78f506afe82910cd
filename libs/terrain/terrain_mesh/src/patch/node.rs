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
    geometry::{GeometryInput, GeometryProcessor, ProcessedGeometry},
    mesh::{DisposableMap, PatchMesh},
    patch::{
        template::PatchTemplate, ChildIndex, CornerKind, EdgeCode, EdgeKind, EdgesKind, PatchId,
    },
    quad_tree::QuadTree,
    tile::TileGeometryStore,
};
use heightmap::{Heightmap, MaterialsStore};
use log::warn;
use std::sync::Arc;
use throttle::{AsyncTask, PromiseThrottler, TaskState};

// Vertical drop and outward margin applied to boundaries against hidden
// neighbours, so the skirt wall hides the crack.
const LIMIT_DROP: f32 = -20.0;
const MARGIN_SIZE: f32 = 2.0;

/// Everything a patch needs from its owner while updating meshes.
pub(crate) struct UpdateContext<'a> {
    pub store: &'a TileGeometryStore,
    pub quad_tree: &'a mut QuadTree,
    pub processor: &'a mut GeometryProcessor,
    pub sampler: &'a Arc<dyn Heightmap>,
    pub materials: &'a Arc<dyn MaterialsStore>,
    pub throttler: &'a PromiseThrottler,
    pub base_patch_size: u32,
    pub step: u32,
}

// One node of the patch tree: its identity, the sampled template, and the
// mesh variants cached per edge code. Children outlive a merge so their
// meshes stay warm until garbage collection.
pub(crate) struct PatchNode {
    id: PatchId,
    visible: bool,
    is_subdivided: bool,
    children: Option<Box<[PatchNode; 4]>>,
    template: Option<PatchTemplate>,
    meshes: DisposableMap<EdgeCode, PatchMesh>,
    building: Option<(EdgeCode, AsyncTask<ProcessedGeometry>)>,
    active: Option<EdgeCode>,
    disposed: bool,
}

impl PatchNode {
    pub(crate) fn new(id: PatchId) -> Self {
        Self {
            id,
            visible: true,
            is_subdivided: false,
            children: None,
            template: None,
            meshes: DisposableMap::new(),
            building: None,
            active: None,
            disposed: false,
        }
    }

    pub(crate) fn is_visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Clear subdivision flags recursively and mark everything visible,
    /// ready for a fresh visibility pass.
    pub(crate) fn reset_subdivisions(&mut self) {
        self.is_subdivided = false;
        self.visible = true;
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                child.reset_subdivisions();
            }
        }
    }

    /// Find or create the node for `target` under this one, subdividing
    /// along the way. Returns `None` when `target` is not below this node.
    pub(crate) fn get_or_build_sub_node(
        &mut self,
        target: &PatchId,
        quad_tree: &mut QuadTree,
    ) -> Option<&mut PatchNode> {
        if *target == self.id {
            return Some(self);
        }
        if target.level() >= self.id.level() || !self.id.contains(target) {
            return None;
        }
        self.ensure_subdivided(quad_tree);
        let children = self.children.as_mut().unwrap();
        for child in children.iter_mut() {
            if child.id == *target || child.id.contains(target) {
                return child.get_or_build_sub_node(target, quad_tree);
            }
        }
        panic!("patch {} contains {} but no child claims it", self.id, target);
    }

    // Split: make neighbour information available in the quadtree first,
    // then bring up the four children.
    fn ensure_subdivided(&mut self, quad_tree: &mut QuadTree) {
        assert!(self.id.level() > 0, "cannot split level-0 patch {}", self.id);
        if !self.is_subdivided {
            for (dx, dy) in [(0, 1), (0, -1), (-1, 0), (1, 0)] {
                quad_tree.get_or_build_node(&self.id.neighbour(dx, dy));
            }
        }
        if self.children.is_none() {
            self.children = Some(Box::new([
                PatchNode::new(self.id.child(ChildIndex::Mm)),
                PatchNode::new(self.id.child(ChildIndex::Pm)),
                PatchNode::new(self.id.child(ChildIndex::Mp)),
                PatchNode::new(self.id.child(ChildIndex::Pp)),
            ]));
        }
        self.is_subdivided = true;
    }

    /// The per-tick mesh pass: subdivided nodes recurse, visible leaves
    /// attach the mesh matching their current edge code, building it first
    /// if this configuration was never seen.
    pub(crate) fn update_mesh(&mut self, ctx: &mut UpdateContext) {
        self.active = None;
        if self.disposed {
            return;
        }
        if self.is_subdivided {
            let children = self
                .children
                .as_mut()
                .expect("subdivided patch without children");
            for child in children.iter_mut() {
                child.update_mesh(ctx);
            }
            return;
        }
        // Merged: whatever the children attached last pass is stale now.
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                child.clear_attachments();
            }
        }
        if !self.visible {
            // Late results still land in the cache for when we come back.
            self.poll_building(ctx.base_patch_size);
            return;
        }

        let kinds = self.derive_edges(ctx.quad_tree);
        let code = kinds.code();

        self.poll_building(ctx.base_patch_size);
        if !self.meshes.contains_key(&code) && self.building.is_none() {
            self.start_build(kinds, code, ctx);
            self.poll_building(ctx.base_patch_size);
        }
        if self.meshes.contains_key(&code) {
            self.active = Some(code);
        }
    }

    fn clear_attachments(&mut self) {
        self.active = None;
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                child.clear_attachments();
            }
        }
    }

    /// Pure over the neighbours' (exists, visible) states in the quadtree.
    fn derive_edges(&self, quad_tree: &QuadTree) -> EdgesKind {
        let state = |dx: i32, dy: i32| quad_tree.neighbour_state(&self.id.neighbour(dx, dy));
        EdgesKind::derive(
            [state(0, 1), state(0, -1), state(-1, 0), state(1, 0)],
            [state(-1, 1), state(1, 1), state(-1, -1), state(1, -1)],
        )
    }

    // Drive template sampling; once samples exist, hand the decorated
    // buffers to the geometry processor.
    fn start_build(&mut self, kinds: EdgesKind, code: EdgeCode, ctx: &mut UpdateContext) {
        if self.template.is_none() {
            self.template = Some(PatchTemplate::new(
                self.id,
                ctx.store,
                ctx.base_patch_size,
                ctx.step,
                ctx.sampler,
                ctx.throttler,
            ));
        }
        let template = self.template.as_mut().unwrap();
        template.ensure_requested(ctx.sampler, ctx.throttler);
        template.poll(ctx.materials);
        let samples = match template.samples() {
            Some(samples) => samples,
            // Still sampling, or failed and queued for retry: no mesh this
            // tick.
            None => return,
        };

        let indices = ctx.store.get_indices(kinds.resolution());
        let mut positions = template.positions().to_vec();

        for (corner, index) in [
            (kinds.up_left, indices.corners.up_left),
            (kinds.up_right, indices.corners.up_right),
            (kinds.down_left, indices.corners.down_left),
            (kinds.down_right, indices.corners.down_right),
        ] {
            if corner == CornerKind::Limit {
                positions[3 * index as usize + 1] = LIMIT_DROP;
            }
        }
        for (edge, list, outward) in [
            (kinds.up, &indices.edges.up, (0f32, 1f32)),
            (kinds.down, &indices.edges.down, (0f32, -1f32)),
            (kinds.left, &indices.edges.left, (-1f32, 0f32)),
            (kinds.right, &indices.edges.right, (1f32, 0f32)),
        ] {
            if edge == EdgeKind::Limit {
                for &index in list {
                    let i = 3 * index as usize;
                    positions[i] += MARGIN_SIZE * outward.0;
                    positions[i + 1] = LIMIT_DROP;
                    positions[i + 2] += MARGIN_SIZE * outward.1;
                }
            }
        }

        for (vertex, &altitude) in positions.chunks_mut(3).zip(samples.altitudes.iter()) {
            vertex[1] += altitude;
        }

        let input = GeometryInput {
            positions,
            colors: samples.colors.clone(),
            indices: indices.buffer,
        };
        let promise = ctx.processor.process(input);
        let mut task = AsyncTask::new(move || promise);
        task.start();
        self.building = Some((code, task));
    }

    // Collect a finished geometry job into the mesh cache. Outputs for a
    // disposed patch are discarded.
    fn poll_building(&mut self, base_patch_size: u32) {
        let finished = match &mut self.building {
            Some((_, task)) => task.poll() == TaskState::Finished,
            None => return,
        };
        if !finished {
            return;
        }
        let (code, mut task) = self.building.take().unwrap();
        match task.take_result() {
            Some(geometry) => {
                if self.disposed {
                    return;
                }
                let (x, z) = self.id.world_origin(base_patch_size);
                let origin = [x as f32, 0.0, z as f32];
                self.meshes.insert(code, PatchMesh::new(geometry, origin));
            }
            None => warn!("geometry processing for {} cancelled", self.id),
        }
    }

    /// Release every GPU-side resource this subtree holds.
    pub(crate) fn dispose(&mut self) {
        self.disposed = true;
        self.meshes.clear();
        self.building = None;
        self.template = None;
        self.active = None;
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                child.dispose();
            }
        }
    }

    /// Prune children kept after a merge; recurse where still subdivided.
    pub(crate) fn garbage_collect(&mut self) {
        if !self.is_subdivided {
            if let Some(mut children) = self.children.take() {
                for child in children.iter_mut() {
                    child.dispose();
                }
            }
        } else if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                child.garbage_collect();
            }
        }
    }

    /// Visit every mesh attached by the last update pass.
    pub(crate) fn visit_attached<'a>(&'a self, visit: &mut impl FnMut(&'a PatchId, &'a PatchMesh)) {
        if let Some(code) = self.active {
            if let Some(mesh) = self.meshes.get(&code) {
                visit(&self.id, mesh);
            }
        }
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                child.visit_attached(visit);
            }
        }
    }

    /// Visit every cached mesh in the subtree, attached or not.
    pub(crate) fn visit_loaded(&self, visit: &mut impl FnMut(&PatchMesh)) {
        for mesh in self.meshes.values() {
            visit(mesh);
        }
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                child.visit_loaded(visit);
            }
        }
    }
}

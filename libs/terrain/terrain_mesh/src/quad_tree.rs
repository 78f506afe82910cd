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

// Visibility index over the patch pyramid. Nodes live in an arena; roots
// are the patches at max_level, created on demand and found through a map
// keyed by their coordinates. One level convention everywhere: patch level
// 0 is the finest, max_level the coarsest root.

use crate::patch::{ChildIndex, NeighbourState, PatchId};
use fxhash::FxHashMap;
use log::trace;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct QuadTreeNodeId {
    id: u32,
}

impl QuadTreeNodeId {
    fn new(id: usize) -> Self {
        assert!(id < u32::MAX as usize);
        Self { id: id as u32 }
    }

    fn empty() -> Self {
        Self { id: u32::MAX }
    }

    fn is_empty(&self) -> bool {
        self.id == u32::MAX
    }

    fn offset(&self) -> usize {
        self.id as usize
    }
}

struct QuadTreeNode {
    visible: bool,
    children: [QuadTreeNodeId; 4],
}

impl QuadTreeNode {
    fn new() -> Self {
        Self {
            visible: true,
            children: [QuadTreeNodeId::empty(); 4],
        }
    }

    fn has_children(&self) -> bool {
        !self.children[0].is_empty()
    }
}

pub struct QuadTree {
    max_level: u32,
    base_patch_size: u32,
    nodes: Vec<QuadTreeNode>,
    roots: FxHashMap<(i32, i32), QuadTreeNodeId>,
}

impl QuadTree {
    pub fn new(max_level: u32, base_patch_size: u32) -> Self {
        Self {
            max_level,
            base_patch_size,
            nodes: Vec::new(),
            roots: FxHashMap::default(),
        }
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    fn alloc(&mut self) -> QuadTreeNodeId {
        let id = QuadTreeNodeId::new(self.nodes.len());
        self.nodes.push(QuadTreeNode::new());
        id
    }

    /// Walk down from the containing root, creating the root and any
    /// intermediate subdivisions on demand. Level-0 nodes never subdivide.
    pub fn get_or_build_node(&mut self, id: &PatchId) -> QuadTreeNodeId {
        debug_assert!(id.level() <= self.max_level);
        let root = id.ancestor(self.max_level);
        let root_key = (root.x(), root.y());
        let node = match self.roots.get(&root_key) {
            Some(&node) => node,
            None => {
                let node = self.alloc();
                self.roots.insert(root_key, node);
                trace!("quad-tree root {} created", root);
                node
            }
        };
        self.descend_or_build(node, &root, id)
    }

    fn descend_or_build(
        &mut self,
        node: QuadTreeNodeId,
        at: &PatchId,
        target: &PatchId,
    ) -> QuadTreeNodeId {
        if at.level() == target.level() {
            debug_assert_eq!(at, target);
            return node;
        }
        if !self.nodes[node.offset()].has_children() {
            let children = [self.alloc(), self.alloc(), self.alloc(), self.alloc()];
            self.nodes[node.offset()].children = children;
        }
        let next = target.ancestor(at.level() - 1);
        let quadrant = Self::quadrant_of(at, &next);
        let child = self.nodes[node.offset()].children[quadrant.to_index()];
        self.descend_or_build(child, &next, target)
    }

    fn quadrant_of(parent: &PatchId, child: &PatchId) -> ChildIndex {
        debug_assert_eq!(child.level() + 1, parent.level());
        let dx = child.x() - 2 * parent.x();
        let dy = child.y() - 2 * parent.y();
        debug_assert!((0..2).contains(&dx) && (0..2).contains(&dy));
        match (dx, dy) {
            (0, 0) => ChildIndex::Mm,
            (1, 0) => ChildIndex::Pm,
            (0, 1) => ChildIndex::Mp,
            (1, 1) => ChildIndex::Pp,
            _ => unreachable!(),
        }
    }

    /// Non-creating lookup.
    pub fn try_get_node(&self, id: &PatchId) -> Option<QuadTreeNodeId> {
        if id.level() > self.max_level {
            return None;
        }
        let root = id.ancestor(self.max_level);
        let mut node = *self.roots.get(&(root.x(), root.y()))?;
        let mut at = root;
        while at.level() > id.level() {
            if !self.nodes[node.offset()].has_children() {
                return None;
            }
            let next = id.ancestor(at.level() - 1);
            let quadrant = Self::quadrant_of(&at, &next);
            node = self.nodes[node.offset()].children[quadrant.to_index()];
            at = next;
        }
        Some(node)
    }

    pub fn root_nodes(&self) -> impl Iterator<Item = (PatchId, QuadTreeNodeId)> + '_ {
        let level = self.max_level;
        self.roots
            .iter()
            .map(move |(&(x, y), &node)| (PatchId::new(level, x, y), node))
    }

    pub fn set_visible(&mut self, node: QuadTreeNodeId, visible: bool) {
        self.nodes[node.offset()].visible = visible;
    }

    /// A node shows on screen iff it is marked visible and, when it has
    /// children, at least one descendant does too. This propagates fine
    /// tiles' visibility up to their ancestors.
    pub fn is_visible(&self, node: QuadTreeNodeId) -> bool {
        let n = &self.nodes[node.offset()];
        if !n.visible {
            return false;
        }
        if !n.has_children() {
            return true;
        }
        n.children.iter().any(|&child| self.is_visible(child))
    }

    /// What a patch can know about the neighbour at `id` when stitching.
    pub fn neighbour_state(&self, id: &PatchId) -> NeighbourState {
        match self.try_get_node(id) {
            None => NeighbourState::Missing,
            Some(node) => {
                if self.is_visible(node) {
                    NeighbourState::Visible
                } else {
                    NeighbourState::Hidden
                }
            }
        }
    }

    fn base_patch_at(&self, x: f64, z: f64) -> PatchId {
        let base = self.base_patch_size as f64;
        PatchId::new(0, (x / base).floor() as i32, (z / base).floor() as i32)
    }

    /// The per-reconfiguration visibility pass:
    ///   1. every existing root goes invisible;
    ///   2. roots whose centre lies in the visibility disc go visible;
    ///   3. base patches whose centre lies in the focus disc are built out
    ///      to level 0 and marked visible;
    ///   4. hidden base patches go invisible, with their 3x3 neighbourhood
    ///      built so stitching can see them.
    pub fn apply_visibility(
        &mut self,
        focus: (f64, f64),
        focus_distance: f64,
        visibility_distance: f64,
        hidden: &[PatchId],
    ) {
        for (_, node) in self.roots.iter() {
            self.nodes[node.offset()].visible = false;
        }

        let top_size = (self.base_patch_size as u64 * (1u64 << self.max_level)) as f64;
        let in_disc = |origin: (f64, f64), side: f64, distance: f64| {
            let cx = origin.0 + side / 2.0 - focus.0;
            let cz = origin.1 + side / 2.0 - focus.1;
            (cx * cx + cz * cz).sqrt() <= distance
        };

        let lo_x = ((focus.0 - visibility_distance) / top_size).floor() as i32;
        let hi_x = ((focus.0 + visibility_distance) / top_size).floor() as i32;
        let lo_y = ((focus.1 - visibility_distance) / top_size).floor() as i32;
        let hi_y = ((focus.1 + visibility_distance) / top_size).floor() as i32;
        for y in lo_y..=hi_y {
            for x in lo_x..=hi_x {
                let root = PatchId::new(self.max_level, x, y);
                if in_disc(root.world_origin(self.base_patch_size), top_size, visibility_distance) {
                    let node = self.get_or_build_node(&root);
                    self.set_visible(node, true);
                }
            }
        }

        let base = self.base_patch_size as f64;
        let focus_lo = self.base_patch_at(focus.0 - focus_distance, focus.1 - focus_distance);
        let focus_hi = self.base_patch_at(focus.0 + focus_distance, focus.1 + focus_distance);
        for y in focus_lo.y()..=focus_hi.y() {
            for x in focus_lo.x()..=focus_hi.x() {
                let id = PatchId::new(0, x, y);
                if in_disc(id.world_origin(self.base_patch_size), base, focus_distance) {
                    let node = self.get_or_build_node(&id);
                    self.set_visible(node, true);
                }
            }
        }

        for id in hidden {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    self.get_or_build_node(&id.neighbour(dx, dy));
                }
            }
            let node = self.get_or_build_node(id);
            self.set_visible(node, false);
        }
    }
}

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

/// How one side of a patch is meshed: at the patch's own resolution, or at
/// half resolution to match a coarser neighbour.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum EdgeResolution {
    Simple,
    Decimated,
}

/// Per-side resolution selection; the key into the tile geometry store's
/// sixteen index buffers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct EdgesResolution {
    pub up: EdgeResolution,
    pub down: EdgeResolution,
    pub left: EdgeResolution,
    pub right: EdgeResolution,
}

impl EdgesResolution {
    pub fn uniform(resolution: EdgeResolution) -> Self {
        Self {
            up: resolution,
            down: resolution,
            left: resolution,
            right: resolution,
        }
    }

    /// Cache slot in `[0, 16)`.
    pub fn key(&self) -> usize {
        let bit = |r: EdgeResolution| match r {
            EdgeResolution::Simple => 0usize,
            EdgeResolution::Decimated => 1usize,
        };
        bit(self.up) | bit(self.down) << 1 | bit(self.left) << 2 | bit(self.right) << 3
    }

    pub fn all() -> impl Iterator<Item = EdgesResolution> {
        let variants = [EdgeResolution::Simple, EdgeResolution::Decimated];
        variants.into_iter().flat_map(move |up| {
            variants.into_iter().flat_map(move |down| {
                variants.into_iter().flat_map(move |left| {
                    variants.into_iter().map(move |right| EdgesResolution {
                        up,
                        down,
                        left,
                        right,
                    })
                })
            })
        })
    }
}

/// A side's stitching state. `Limit` marks the boundary to a neighbour that
/// exists but is hidden; the side is meshed simple and dropped into a skirt.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum EdgeKind {
    Simple,
    Decimated,
    Limit,
}

impl EdgeKind {
    pub fn resolution(self) -> EdgeResolution {
        match self {
            EdgeKind::Simple | EdgeKind::Limit => EdgeResolution::Simple,
            EdgeKind::Decimated => EdgeResolution::Decimated,
        }
    }

    fn bits(self) -> u16 {
        match self {
            EdgeKind::Simple => 0,
            EdgeKind::Decimated => 1,
            EdgeKind::Limit => 2,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CornerKind {
    Simple,
    Limit,
}

impl CornerKind {
    fn bits(self) -> u16 {
        match self {
            CornerKind::Simple => 0,
            CornerKind::Limit => 1,
        }
    }
}

/// What a patch can observe about one neighbour when deriving edge kinds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NeighbourState {
    /// No node at the neighbour's id; the region is meshed coarser.
    Missing,
    Hidden,
    Visible,
}

/// Full stitching state of a patch boundary: four sides and four corners.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct EdgesKind {
    pub up: EdgeKind,
    pub down: EdgeKind,
    pub left: EdgeKind,
    pub right: EdgeKind,
    pub up_left: CornerKind,
    pub up_right: CornerKind,
    pub down_left: CornerKind,
    pub down_right: CornerKind,
}

/// Eight 2-bit fields packed into the per-patch mesh cache key.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct EdgeCode(pub u16);

impl EdgesKind {
    pub fn uniform_simple() -> Self {
        Self {
            up: EdgeKind::Simple,
            down: EdgeKind::Simple,
            left: EdgeKind::Simple,
            right: EdgeKind::Simple,
            up_left: CornerKind::Simple,
            up_right: CornerKind::Simple,
            down_left: CornerKind::Simple,
            down_right: CornerKind::Simple,
        }
    }

    /// Pure derivation from the neighbourhood: sides in up, down, left,
    /// right order; corners in up-left, up-right, down-left, down-right
    /// order.
    pub fn derive(sides: [NeighbourState; 4], corners: [NeighbourState; 4]) -> Self {
        let side = |state: NeighbourState| match state {
            NeighbourState::Missing => EdgeKind::Decimated,
            NeighbourState::Hidden => EdgeKind::Limit,
            NeighbourState::Visible => EdgeKind::Simple,
        };
        let corner = |state: NeighbourState| match state {
            NeighbourState::Hidden => CornerKind::Limit,
            NeighbourState::Missing | NeighbourState::Visible => CornerKind::Simple,
        };
        Self {
            up: side(sides[0]),
            down: side(sides[1]),
            left: side(sides[2]),
            right: side(sides[3]),
            up_left: corner(corners[0]),
            up_right: corner(corners[1]),
            down_left: corner(corners[2]),
            down_right: corner(corners[3]),
        }
    }

    pub fn code(&self) -> EdgeCode {
        EdgeCode(
            self.up.bits()
                | self.down.bits() << 2
                | self.left.bits() << 4
                | self.right.bits() << 6
                | self.up_left.bits() << 8
                | self.up_right.bits() << 10
                | self.down_left.bits() << 12
                | self.down_right.bits() << 14,
        )
    }

    /// The simple/decimated combination selecting the index buffer.
    pub fn resolution(&self) -> EdgesResolution {
        EdgesResolution {
            up: self.up.resolution(),
            down: self.down.resolution(),
            left: self.left.resolution(),
            right: self.right.resolution(),
        }
    }
}

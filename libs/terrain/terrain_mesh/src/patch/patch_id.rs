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
use std::fmt;

// Quadrants of a subdivided patch. The first letter is the x half, the
// second the y half; `m` is the low side, `p` the high side.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChildIndex {
    Mm,
    Pm,
    Mp,
    Pp,
}

impl ChildIndex {
    pub fn all() -> [ChildIndex; 4] {
        [ChildIndex::Mm, ChildIndex::Pm, ChildIndex::Mp, ChildIndex::Pp]
    }

    pub fn to_index(self) -> usize {
        match self {
            ChildIndex::Mm => 0,
            ChildIndex::Pm => 1,
            ChildIndex::Mp => 2,
            ChildIndex::Pp => 3,
        }
    }

    fn offsets(self) -> (i32, i32) {
        match self {
            ChildIndex::Mm => (0, 0),
            ChildIndex::Pm => (1, 0),
            ChildIndex::Mp => (0, 1),
            ChildIndex::Pp => (1, 1),
        }
    }
}

/// Identity of one square patch of terrain. Level 0 is the finest
/// resolution; each increment doubles the side length. A patch covers the
/// world-XZ square with corner `(x·S, y·S)` and side
/// `S = base_patch_size · 2^level`. The domain is unbounded, so patch
/// coordinates are signed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PatchId {
    level: u32,
    x: i32,
    y: i32,
}

impl PatchId {
    pub fn new(level: u32, x: i32, y: i32) -> Self {
        Self { level, x, y }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    /// Side length in world units.
    pub fn world_side(&self, base_patch_size: u32) -> f64 {
        (base_patch_size as u64 * (1u64 << self.level)) as f64
    }

    /// Low corner of the covered square, in world units.
    pub fn world_origin(&self, base_patch_size: u32) -> (f64, f64) {
        let side = self.world_side(base_patch_size);
        (self.x as f64 * side, self.y as f64 * side)
    }

    pub fn neighbour(&self, dx: i32, dy: i32) -> Self {
        Self {
            level: self.level,
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// True when `other`'s centre lies inside this patch's square. Exact
    /// integer arithmetic in half-units of the finest grid.
    pub fn contains(&self, other: &PatchId) -> bool {
        let lo_x = (self.x as i64) << (self.level + 1);
        let lo_y = (self.y as i64) << (self.level + 1);
        let side = 1i64 << (self.level + 1);
        let centre_x = ((other.x as i64) << (other.level + 1)) + (1i64 << other.level);
        let centre_y = ((other.y as i64) << (other.level + 1)) + (1i64 << other.level);
        centre_x >= lo_x && centre_x < lo_x + side && centre_y >= lo_y && centre_y < lo_y + side
    }

    pub fn child(&self, quadrant: ChildIndex) -> Self {
        assert!(self.level > 0, "level-0 patches do not subdivide");
        let (dx, dy) = quadrant.offsets();
        Self {
            level: self.level - 1,
            x: 2 * self.x + dx,
            y: 2 * self.y + dy,
        }
    }

    /// The ancestor at `level`; arithmetic shift keeps flooring correct for
    /// negative coordinates.
    pub fn ancestor(&self, level: u32) -> Self {
        assert!(level >= self.level);
        let shift = level - self.level;
        Self {
            level,
            x: self.x >> shift,
            y: self.y >> shift,
        }
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}__{}_{}", self.level, self.x, self.y)
    }
}

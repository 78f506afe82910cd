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
mod edge;
mod node;
mod patch_id;
mod template;

pub use crate::patch::{
    edge::{
        CornerKind, EdgeCode, EdgeKind, EdgeResolution, EdgesKind, EdgesResolution, NeighbourState,
    },
    patch_id::{ChildIndex, PatchId},
};
pub(crate) use crate::patch::node::{PatchNode, UpdateContext};

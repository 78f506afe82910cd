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
use crate::geometry::ProcessedGeometry;
use fxhash::FxHashMap;
use std::hash::Hash;

/// Owns renderer-side resources; disposal releases them exactly once.
pub trait Dispose {
    fn dispose(&mut self);
}

/// The record emitted to the renderer for one patch: CPU-side buffers plus
/// enough metadata to place and account for them.
#[derive(Clone, Debug)]
pub struct PatchMesh {
    positions: Vec<f32>,
    colors: Vec<f32>,
    normals: Vec<f32>,
    indices: Option<Vec<u16>>,
    triangle_count: usize,
    byte_size: usize,
    world_origin: [f32; 3],
    disposed: bool,
}

impl PatchMesh {
    pub fn new(geometry: ProcessedGeometry, world_origin: [f32; 3]) -> Self {
        let triangle_count = match &geometry.indices {
            Some(indices) => indices.len() / 3,
            None => geometry.positions.len() / 9,
        };
        let index_bytes = geometry.indices.as_ref().map_or(0, |i| 2 * i.len());
        let byte_size = 4 * (geometry.positions.len() + geometry.colors.len() + geometry.normals.len())
            + index_bytes;
        Self {
            positions: geometry.positions,
            colors: geometry.colors,
            normals: geometry.normals,
            indices: geometry.indices,
            triangle_count,
            byte_size,
            world_origin,
            disposed: false,
        }
    }

    pub fn positions(&self) -> &[f32] {
        &self.positions
    }

    pub fn colors(&self) -> &[f32] {
        &self.colors
    }

    pub fn normals(&self) -> &[f32] {
        &self.normals
    }

    pub fn indices(&self) -> Option<&[u16]> {
        self.indices.as_deref()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangle_count
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn world_origin(&self) -> [f32; 3] {
        self.world_origin
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Dispose for PatchMesh {
    fn dispose(&mut self) {
        self.positions = Vec::new();
        self.colors = Vec::new();
        self.normals = Vec::new();
        self.indices = None;
        self.triangle_count = 0;
        self.byte_size = 0;
        self.disposed = true;
    }
}

// A map that guarantees its values are disposed on removal, clear and drop.
pub struct DisposableMap<K, V>
where
    K: Copy + Eq + Hash,
    V: Dispose,
{
    map: FxHashMap<K, V>,
}

impl<K, V> DisposableMap<K, V>
where
    K: Copy + Eq + Hash,
    V: Dispose,
{
    pub fn new() -> Self {
        Self {
            map: FxHashMap::default(),
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        if let Some(mut previous) = self.map.insert(key, value) {
            previous.dispose();
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.map.values()
    }

    pub fn remove(&mut self, key: &K) -> bool {
        match self.map.remove(key) {
            Some(mut value) => {
                value.dispose();
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        for value in self.map.values_mut() {
            value.dispose();
        }
        self.map.clear();
    }
}

impl<K, V> Default for DisposableMap<K, V>
where
    K: Copy + Eq + Hash,
    V: Dispose,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for DisposableMap<K, V>
where
    K: Copy + Eq + Hash,
    V: Dispose,
{
    fn drop(&mut self) {
        for value in self.map.values_mut() {
            value.dispose();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{cell::Cell, rc::Rc};

    struct Tracked(Rc<Cell<u32>>);

    impl Dispose for Tracked {
        fn dispose(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_mesh_accounting() {
        let mesh = PatchMesh::new(
            ProcessedGeometry {
                positions: vec![0.0; 27],
                colors: vec![0.0; 27],
                normals: vec![0.0; 27],
                indices: Some(vec![0; 12]),
            },
            [0.0, 0.0, 0.0],
        );
        assert_eq!(mesh.triangle_count(), 4);
        assert_eq!(mesh.byte_size(), 27 * 3 * 4 + 24);
    }

    #[test]
    fn test_dispose_releases_and_marks() {
        let mut mesh = PatchMesh::new(
            ProcessedGeometry {
                positions: vec![0.0; 9],
                colors: vec![0.0; 9],
                normals: vec![0.0; 9],
                indices: None,
            },
            [0.0, 0.0, 0.0],
        );
        assert!(!mesh.is_disposed());
        mesh.dispose();
        assert!(mesh.is_disposed());
        assert_eq!(mesh.byte_size(), 0);
        assert!(mesh.positions().is_empty());
    }

    #[test]
    fn test_map_disposes_on_every_exit_path() {
        let count = Rc::new(Cell::new(0));
        let mut map = DisposableMap::new();
        map.insert(1u16, Tracked(count.clone()));
        map.insert(2u16, Tracked(count.clone()));
        // Overwrite disposes the previous value.
        map.insert(2u16, Tracked(count.clone()));
        assert_eq!(count.get(), 1);
        assert!(map.remove(&1));
        assert_eq!(count.get(), 2);
        map.clear();
        assert_eq!(count.get(), 3);

        let mut map = DisposableMap::new();
        map.insert(1u16, Tracked(count.clone()));
        drop(map);
        assert_eq!(count.get(), 4);
    }
}

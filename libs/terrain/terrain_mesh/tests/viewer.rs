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
use anyhow::{anyhow, Result};
use heightmap::{AltitudeRange, Heightmap, HeightmapSamples, MaterialsStore, Rgb, VoxelMaterial};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use terrain_mesh::{HeightmapViewer, PatchId, PatchMesh, ViewerOptions};
use throttle::{Promise, PromiseSender};

type AltitudeFn = fn(f32, f32) -> f32;

struct TestSampler {
    altitude: AltitudeFn,
    failing: AtomicBool,
    deferring: AtomicBool,
    pending: Mutex<Vec<(Vec<f32>, PromiseSender<Result<HeightmapSamples>>)>>,
    calls: AtomicUsize,
}

impl TestSampler {
    fn with_altitude(altitude: AltitudeFn) -> Arc<Self> {
        Arc::new(Self {
            altitude,
            failing: AtomicBool::new(false),
            deferring: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn plane() -> Arc<Self> {
        Self::with_altitude(|_, _| 0.0)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn set_deferring(&self, deferring: bool) {
        self.deferring.store(deferring, Ordering::SeqCst);
    }

    fn compute(&self, coordinates: &[f32]) -> HeightmapSamples {
        let altitudes = coordinates
            .chunks(2)
            .map(|pair| (self.altitude)(pair[0], pair[1]))
            .collect::<Vec<f32>>();
        let materials = vec![0u32; altitudes.len()];
        HeightmapSamples::new(altitudes, materials).unwrap()
    }

    /// Resolve every request captured while deferring.
    fn resolve_pending(&self) {
        for (coordinates, sender) in self.pending.lock().drain(..) {
            let samples = self.compute(&coordinates);
            sender.resolve(Ok(samples));
        }
    }
}

impl Heightmap for TestSampler {
    fn altitude_range(&self) -> AltitudeRange {
        AltitudeRange {
            min: -100.0,
            max: 100.0,
        }
    }

    fn sample(&self, coordinates: Vec<f32>) -> Promise<Result<HeightmapSamples>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Promise::ready(Err(anyhow!("sampler temporarily unavailable")));
        }
        if self.deferring.load(Ordering::SeqCst) {
            let (sender, promise) = Promise::channel();
            self.pending.lock().push((coordinates, sender));
            return promise;
        }
        Promise::ready(Ok(self.compute(&coordinates)))
    }
}

struct GreyMaterials;

impl MaterialsStore for GreyMaterials {
    fn voxel_material(&self, material_id: u32) -> VoxelMaterial {
        let level = material_id as f32 / 255.0;
        VoxelMaterial {
            color: Rgb {
                r: level,
                g: level,
                b: level,
            },
        }
    }
}

fn viewer(options: ViewerOptions, sampler: Arc<TestSampler>) -> HeightmapViewer {
    let _ = env_logger::builder().is_test(true).try_init();
    HeightmapViewer::new(options, sampler, Arc::new(GreyMaterials)).unwrap()
}

fn options() -> ViewerOptions {
    ViewerOptions {
        base_patch_size: 64,
        step: 4,
        max_level: 2,
        flat_shading: false,
        dedicated_threads: 0,
        max_concurrent_samplings: 64,
        garbage_collect_interval: Duration::ZERO,
    }
}

/// World-space vertices of a mesh, one `[x, y, z]` per vertex.
fn world_vertices(mesh: &PatchMesh) -> Vec<[f32; 3]> {
    let origin = mesh.world_origin();
    mesh.positions()
        .chunks(3)
        .map(|v| [origin[0] + v[0], origin[1] + v[1], origin[2] + v[2]])
        .collect()
}

fn referenced(mesh: &PatchMesh) -> HashSet<u16> {
    mesh.indices().unwrap().iter().copied().collect()
}

fn find_mesh<'a>(
    meshes: &'a [(&'a PatchId, &'a PatchMesh)],
    id: PatchId,
) -> Option<&'a PatchMesh> {
    meshes
        .iter()
        .find(|(mesh_id, _)| **mesh_id == id)
        .map(|(_, mesh)| *mesh)
}

#[test]
fn test_uniform_plane() {
    let sampler = TestSampler::plane();
    let mut viewer = viewer(options(), sampler);
    viewer.set_focus_point(0.0, 0.0);
    viewer.set_focus_distance(64.0);
    viewer.set_visibility_distance(256.0);
    viewer.update().unwrap();

    let meshes = viewer.visible_meshes();

    // A one-ring of nine top-level patches is visible.
    let tops: HashSet<(i32, i32)> = meshes
        .iter()
        .map(|(id, _)| {
            let top = id.ancestor(2);
            (top.x(), top.y())
        })
        .collect();
    assert_eq!(tops.len(), 9);

    // The centre is refined through all three levels.
    let levels: HashSet<u32> = meshes.iter().map(|(id, _)| id.level()).collect();
    assert_eq!(levels, HashSet::from([0, 1, 2]));
    assert_eq!(meshes.len(), 33);

    // Flat world: every vertex at altitude zero, every normal straight up.
    for (_, mesh) in &meshes {
        for vertex in world_vertices(mesh) {
            assert_eq!(vertex[1], 0.0);
        }
        for normal in mesh.normals().chunks(3) {
            assert_eq!(normal, &[0.0, 1.0, 0.0]);
        }
    }

    // Fully surrounded leaves carry the full 2*N^2 triangles.
    for (x, y) in [(0, 0), (-1, 0), (0, -1), (-1, -1)] {
        let mesh = find_mesh(&meshes, PatchId::new(0, x, y)).unwrap();
        assert_eq!(mesh.triangle_count(), 2 * 16 * 16);
    }

    let stats = viewer.statistics();
    assert_eq!(stats.meshes.visible_count, 33);
    assert_eq!(stats.meshes.loaded_count, 33);
    assert!(stats.gpu_memory_bytes > 0);
}

#[test]
fn test_single_step_ramp_has_no_seam() {
    let sampler = TestSampler::with_altitude(|x, _| (x / 64.0).floor());
    let mut viewer = viewer(
        ViewerOptions {
            max_level: 1,
            ..options()
        },
        sampler,
    );
    viewer.set_focus_point(64.0, 32.0);
    viewer.set_focus_distance(48.0);
    viewer.set_visibility_distance(128.0);
    viewer.update().unwrap();

    let meshes = viewer.visible_meshes();
    let west = find_mesh(&meshes, PatchId::new(0, 0, 0)).expect("west patch refined");
    let east = find_mesh(&meshes, PatchId::new(0, 1, 0)).expect("east patch refined");

    // Both patches sample the shared boundary X = 64; altitudes must agree
    // exactly, vertex for vertex.
    let boundary = |mesh: &PatchMesh| -> Vec<(f32, f32)> {
        let mut vertices: Vec<(f32, f32)> = world_vertices(mesh)
            .into_iter()
            .filter(|v| v[0] == 64.0)
            .map(|v| (v[2], v[1]))
            .collect();
        vertices.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        vertices
    };
    let west_boundary = boundary(west);
    let east_boundary = boundary(east);
    assert_eq!(west_boundary.len(), 17);
    assert_eq!(west_boundary, east_boundary);
    for (_, altitude) in west_boundary {
        assert_eq!(altitude, 1.0);
    }
}

#[test]
fn test_lod_transition_stays_on_coarse_polyline() {
    let sampler = TestSampler::with_altitude(|_, z| (z * 0.09).sin() * 10.0);
    let mut viewer = viewer(
        ViewerOptions {
            max_level: 1,
            ..options()
        },
        sampler,
    );
    viewer.set_focus_point(32.0, 32.0);
    viewer.set_focus_distance(20.0);
    viewer.set_visibility_distance(128.0);
    viewer.update().unwrap();

    let meshes = viewer.visible_meshes();
    // Level-0 patch against the unrefined level-1 neighbour across X = 128.
    let fine = find_mesh(&meshes, PatchId::new(0, 1, 0)).expect("fine patch");
    let coarse = find_mesh(&meshes, PatchId::new(1, 1, 0)).expect("coarse patch");

    let boundary_of = |mesh: &PatchMesh| -> HashSet<(u32, u32)> {
        let vertices = world_vertices(mesh);
        referenced(mesh)
            .into_iter()
            .map(|i| vertices[i as usize])
            .filter(|v| v[0] == 128.0)
            .map(|v| (v[2].to_bits(), v[1].to_bits()))
            .collect()
    };
    let fine_boundary = boundary_of(fine);
    let coarse_boundary = boundary_of(coarse);

    // The decimated fine edge references every other vertex: those must
    // coincide bit-for-bit with coarse edge vertices.
    assert_eq!(fine_boundary.len(), 9);
    assert!(fine_boundary.is_subset(&coarse_boundary));
}

#[test]
fn test_hidden_patch_drops_a_skirt() {
    let sampler = TestSampler::plane();
    let mut viewer = viewer(options(), sampler);
    viewer.set_focus_point(32.0, 32.0);
    viewer.set_focus_distance(0.0);
    viewer.set_visibility_distance(256.0);
    viewer.set_hidden_patches([(10.0, 10.0)]);

    let meshes = viewer.visible_meshes();
    assert!(find_mesh(&meshes, PatchId::new(0, 0, 0)).is_none());

    // Each cardinal neighbour drops its facing edge: 17 vertices pushed
    // outward by the margin and down to the skirt altitude.
    let cases = [
        (PatchId::new(0, -1, 0), 0usize, 66.0f32), // west neighbour, local x
        (PatchId::new(0, 1, 0), 0usize, -2.0),     // east neighbour, local x
        (PatchId::new(0, 0, -1), 2usize, 66.0),    // south neighbour, local z
        (PatchId::new(0, 0, 1), 2usize, -2.0),     // north neighbour, local z
    ];
    for (id, axis, expected) in cases {
        let mesh = find_mesh(&meshes, id).expect("neighbour meshed");
        let skirt: Vec<&[f32]> = mesh
            .positions()
            .chunks(3)
            .filter(|v| v[axis] == expected)
            .collect();
        assert_eq!(skirt.len(), 17, "skirt of {}", id);
        for vertex in skirt {
            assert_eq!(vertex[1], -20.0, "skirt altitude of {}", id);
        }
    }
}

#[test]
fn test_transient_sampler_failure_retries() {
    let sampler = TestSampler::plane();
    sampler.set_failing(true);
    let mut viewer = viewer(options(), sampler.clone());
    viewer.set_focus_point(0.0, 0.0);
    viewer.set_focus_distance(0.0);
    viewer.set_visibility_distance(0.0);

    viewer.update().unwrap();
    assert!(viewer.visible_meshes().is_empty());
    assert_eq!(sampler.calls(), 1);

    // Still failing: the patch re-requests every tick, never attaches.
    viewer.update().unwrap();
    assert!(viewer.visible_meshes().is_empty());
    assert_eq!(sampler.calls(), 2);

    sampler.set_failing(false);
    viewer.update().unwrap();
    let meshes = viewer.visible_meshes();
    assert_eq!(meshes.len(), 1);
    assert_eq!(sampler.calls(), 3);
    // Indexed output keeps the full (N+1)^2 vertex grid.
    assert_eq!(meshes[0].1.positions().len(), 3 * 17 * 17);
}

#[test]
fn test_update_is_idempotent() {
    let sampler = TestSampler::plane();
    let mut viewer = viewer(options(), sampler.clone());
    viewer.set_focus_point(0.0, 0.0);
    viewer.set_focus_distance(64.0);
    viewer.set_visibility_distance(256.0);
    viewer.update().unwrap();

    let stats = viewer.statistics();
    let calls = sampler.calls();
    let first_ptr = viewer.visible_meshes()[0].1.positions().as_ptr();

    viewer.update().unwrap();
    assert_eq!(viewer.statistics(), stats);
    assert_eq!(sampler.calls(), calls);
    // Cache hits attach the very same buffers, no reallocation.
    assert_eq!(viewer.visible_meshes()[0].1.positions().as_ptr(), first_ptr);
}

#[test]
fn test_focus_sweep_bounds_memory() {
    let sampler = TestSampler::plane();
    let mut viewer = viewer(options(), sampler);
    viewer.set_focus_distance(64.0);
    viewer.set_visibility_distance(256.0);

    // Nine tops of at most 21 nodes each, every node holding a few edge
    // variants of ~14 KiB: a generous ceiling proportional to the
    // visibility area.
    let byte_bound = 9 * 21 * 8 * 14 * 1024;
    for tick in 0..30 {
        let x = tick as f64 * (10_000.0 / 29.0);
        viewer.set_focus_point(x, 0.0);
        viewer.update().unwrap();
        let stats = viewer.statistics();
        assert!(
            stats.gpu_memory_bytes < byte_bound,
            "tick {}: {} bytes",
            tick,
            stats.gpu_memory_bytes
        );
    }

    // Everything still loaded belongs to the ring around the final focus.
    let centre = (10_000f64 / 256.0).floor() as i32;
    for (id, _) in viewer.visible_meshes() {
        let top = id.ancestor(2);
        assert!((top.x() - centre).abs() <= 1);
        assert!(top.y().abs() <= 1);
    }
}

#[test]
fn test_disposed_patch_discards_late_samples() {
    let sampler = TestSampler::plane();
    sampler.set_deferring(true);
    let mut viewer = viewer(options(), sampler.clone());
    viewer.set_focus_point(0.0, 0.0);
    viewer.set_focus_distance(0.0);
    viewer.set_visibility_distance(0.0);
    viewer.update().unwrap();
    assert!(viewer.visible_meshes().is_empty());

    // The camera leaves; the requesting patch is garbage collected before
    // its samples arrive.
    viewer.set_focus_point(100_000.0, 0.0);
    viewer.update().unwrap();
    sampler.set_deferring(false);
    sampler.resolve_pending();
    viewer.update().unwrap();

    for (id, _) in viewer.visible_meshes() {
        assert!(id.x() > 0, "stale patch {} survived", id);
    }
}

#[test]
fn test_hidden_patches_can_be_cleared() {
    let sampler = TestSampler::plane();
    let mut viewer = viewer(options(), sampler);
    viewer.set_focus_point(32.0, 32.0);
    viewer.set_focus_distance(0.0);
    viewer.set_visibility_distance(256.0);
    viewer.set_hidden_patches([(10.0, 10.0)]);
    assert!(find_mesh(&viewer.visible_meshes(), PatchId::new(0, 0, 0)).is_none());

    viewer.set_hidden_patches([]);
    viewer.update().unwrap();
    let meshes = viewer.visible_meshes();
    let restored = find_mesh(&meshes, PatchId::new(0, 0, 0));
    assert!(restored.is_some());
    // The restored patch meshes at full altitude again, skirt-free.
    for vertex in world_vertices(restored.unwrap()) {
        assert_eq!(vertex[1], 0.0);
    }

    // The attached set partitions the surface: no patch renders both
    // itself and a descendant.
    for (a, _) in &meshes {
        for (b, _) in &meshes {
            if a != b {
                assert!(!a.contains(b), "{} and {} overlap", a, b);
            }
        }
    }
}

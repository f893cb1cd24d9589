//! Per-level packed transform buffers and the hand-off to an instanced
//! rendering sink.

use bytemuck::{Pod, Zeroable};
use cgmath::{Matrix3, Quaternion, Vector3};
use log::trace;
use rand::Rng;

use crate::config::{Color, FractalConfig, MaterialHandle, MeshHandle};
use crate::error::{FractalError, Result};
use crate::matrix_operations::{
    affine_rows_3x4, linear_from_rows, scaled_rotation, transform_point_rows, trs_rows_4x4,
};
use crate::part::level_len;

/// Per-instance transform layout consumed by the sink.
pub trait PackedMatrix: Pod + Send + Sync + std::fmt::Debug + PartialEq {
    fn pack(rotation: Quaternion<f32>, scale: f32, translation: Vector3<f32>) -> Self;

    fn rows(&self) -> &[[f32; 4]];

    fn translation(&self) -> Vector3<f32> {
        let rows = self.rows();
        Vector3::new(rows[0][3], rows[1][3], rows[2][3])
    }

    fn linear(&self) -> Matrix3<f32> {
        linear_from_rows(self.rows())
    }

    fn transform_point(&self, point: Vector3<f32>) -> Vector3<f32> {
        transform_point_rows(self.rows(), point)
    }
}

/// Row-major 3x4, 48 bytes.
#[repr(C)]
#[derive(Default, Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Affine3x4 {
    pub rows: [[f32; 4]; 3],
}

impl PackedMatrix for Affine3x4 {
    fn pack(rotation: Quaternion<f32>, scale: f32, translation: Vector3<f32>) -> Self {
        Self {
            rows: affine_rows_3x4(scaled_rotation(rotation, scale), translation),
        }
    }

    fn rows(&self) -> &[[f32; 4]] {
        &self.rows
    }
}

/// Row-major 4x4 TRS, 64 bytes.
#[repr(C)]
#[derive(Default, Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Affine4x4 {
    pub rows: [[f32; 4]; 4],
}

impl PackedMatrix for Affine4x4 {
    fn pack(rotation: Quaternion<f32>, scale: f32, translation: Vector3<f32>) -> Self {
        Self {
            rows: trs_rows_4x4(scaled_rotation(rotation, scale), translation),
        }
    }

    fn rows(&self) -> &[[f32; 4]] {
        &self.rows
    }
}

/// Front/back matrix buffers for every level. The frame update writes the
/// back set; `swap` publishes it as the front set read by the sink.
#[derive(Debug)]
pub struct MatrixBuffers<M> {
    front: Vec<Vec<M>>,
    back: Vec<Vec<M>>,
    frames: u64,
}

impl<M: PackedMatrix> MatrixBuffers<M> {
    pub fn allocate(depth: usize) -> Result<Self> {
        Ok(Self {
            front: allocate_set(depth)?,
            back: allocate_set(depth)?,
            frames: 0,
        })
    }

    pub fn depth(&self) -> usize {
        self.front.len()
    }

    /// Number of swaps so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn back_mut(&mut self) -> &mut [Vec<M>] {
        &mut self.back
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
        self.frames += 1;
    }

    pub fn front(&self, level: usize) -> Result<&[M]> {
        self.front
            .get(level)
            .map(Vec::as_slice)
            .ok_or(FractalError::LevelOutOfRange {
                level,
                depth: self.depth(),
            })
    }

    pub fn front_bytes(&self, level: usize) -> Result<&[u8]> {
        Ok(bytemuck::cast_slice(self.front(level)?))
    }

    pub fn byte_size(&self) -> usize {
        let per_set: usize = self.front.iter().map(Vec::len).sum();
        2 * per_set * std::mem::size_of::<M>()
    }
}

fn allocate_set<M: PackedMatrix>(depth: usize) -> Result<Vec<Vec<M>>> {
    let mut set = Vec::new();
    set.try_reserve_exact(depth)
        .map_err(|_| FractalError::Allocation { level: 0, len: depth })?;
    for level in 0..depth {
        let len = level_len(level).ok_or(FractalError::Allocation { level, len: usize::MAX })?;
        let mut matrices = Vec::new();
        matrices
            .try_reserve_exact(len)
            .map_err(|_| FractalError::Allocation { level, len })?;
        matrices.resize(len, M::zeroed());
        set.push(matrices);
    }
    Ok(set)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MeshSelector {
    Branch,
    Leaf,
}

/// Appearance of one level, fixed at build time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LevelAppearance {
    pub color_a: Color,
    pub color_b: Color,
    pub mesh: MeshSelector,
    pub sequence: [f32; 4],
}

/// Gradient colors for inner levels, leaf colors and the leaf mesh for the
/// deepest level, and a random sequence vector per level.
pub fn level_appearances<R: Rng + ?Sized>(
    config: &FractalConfig,
    rng: &mut R,
) -> Vec<LevelAppearance> {
    let depth = config.depth;
    (0..depth)
        .map(|level| {
            let sequence = [rng.gen(), rng.gen(), rng.gen(), rng.gen()];
            if level + 1 == depth {
                LevelAppearance {
                    color_a: config.leaf_color_a,
                    color_b: config.leaf_color_b,
                    mesh: MeshSelector::Leaf,
                    sequence,
                }
            } else {
                let t = gradient_interpolator(level, depth);
                LevelAppearance {
                    color_a: config.gradient_a.evaluate(t),
                    color_b: config.gradient_b.evaluate(t),
                    mesh: MeshSelector::Branch,
                    sequence,
                }
            }
        })
        .collect()
}

/// Position of an inner level along the branch gradient. Only the levels
/// above the leaves span the ramp, so a single inner level sits at 0.
pub fn gradient_interpolator(level: usize, depth: usize) -> f32 {
    if depth <= 2 {
        0.0
    } else {
        level as f32 / (depth - 2) as f32
    }
}

/// Axis-aligned box given by center and full extent.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bounds {
    pub center: Vector3<f32>,
    pub size: Vector3<f32>,
}

impl Bounds {
    /// A `3 * scale` cube around the root, which encloses the whole tree.
    pub fn around_root(root_position: Vector3<f32>, scale: f32) -> Self {
        let edge = 3.0 * scale;
        Self {
            center: root_position,
            size: Vector3::new(edge, edge, edge),
        }
    }

    pub fn contains(&self, point: Vector3<f32>) -> bool {
        let d = point - self.center;
        let h = self.size * 0.5;
        d.x.abs() <= h.x && d.y.abs() <= h.y && d.z.abs() <= h.z
    }
}

/// Per-draw constants uploaded next to the matrix buffer.
#[repr(C)]
#[derive(Default, Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawConstants {
    pub color_a: [f32; 4],
    pub color_b: [f32; 4],
    pub sequence: [f32; 4],
}

pub struct DrawRequest<'a, M> {
    pub level: usize,
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    pub matrices: &'a [M],
    pub bounds: Bounds,
    pub constants: &'a DrawConstants,
}

impl<'a, M: PackedMatrix> DrawRequest<'a, M> {
    pub fn instance_count(&self) -> usize {
        self.matrices.len()
    }

    pub fn matrix_bytes(&self) -> &'a [u8] {
        bytemuck::cast_slice(self.matrices)
    }
}

/// Consumer of one instanced draw per level.
pub trait InstanceSink<M> {
    fn draw_instances(&mut self, request: &DrawRequest<'_, M>);
}

/// Caller-owned scratch reused across draws and frames.
#[derive(Debug, Default)]
pub struct DrawContext {
    constants: DrawConstants,
    draws_issued: u64,
}

impl DrawContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draws_issued(&self) -> u64 {
        self.draws_issued
    }
}

/// Mesh and material lookups needed at draw time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MeshSet {
    pub branch: MeshHandle,
    pub leaf: MeshHandle,
    pub material: MaterialHandle,
}

impl MeshSet {
    pub fn from_config(config: &FractalConfig) -> Self {
        Self {
            branch: config.branch_mesh,
            leaf: config.leaf_mesh,
            material: config.material,
        }
    }

    pub fn mesh(&self, selector: MeshSelector) -> MeshHandle {
        match selector {
            MeshSelector::Branch => self.branch,
            MeshSelector::Leaf => self.leaf,
        }
    }
}

/// Issues one draw per level from the front buffers, in level order.
pub fn submit_levels<M, S>(
    buffers: &MatrixBuffers<M>,
    appearances: &[LevelAppearance],
    meshes: &MeshSet,
    bounds: Bounds,
    context: &mut DrawContext,
    sink: &mut S,
) -> Result<()>
where
    M: PackedMatrix,
    S: InstanceSink<M> + ?Sized,
{
    for (level, appearance) in appearances.iter().enumerate() {
        let matrices = buffers.front(level)?;
        context.constants = DrawConstants {
            color_a: appearance.color_a,
            color_b: appearance.color_b,
            sequence: appearance.sequence,
        };
        sink.draw_instances(&DrawRequest {
            level,
            mesh: meshes.mesh(appearance.mesh),
            material: meshes.material,
            matrices,
            bounds,
            constants: &context.constants,
        });
        context.draws_issued += 1;
    }
    trace!("submitted {} level draws", appearances.len());
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedDraw<M> {
    pub level: usize,
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    pub matrices: Vec<M>,
    pub bounds: Bounds,
    pub constants: DrawConstants,
}

/// Sink that keeps a copy of every request.
#[derive(Debug)]
pub struct RecordingSink<M> {
    pub draws: Vec<RecordedDraw<M>>,
}

impl<M> Default for RecordingSink<M> {
    fn default() -> Self {
        Self { draws: Vec::new() }
    }
}

impl<M> RecordingSink<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.draws.clear();
    }
}

impl<M: PackedMatrix> InstanceSink<M> for RecordingSink<M> {
    fn draw_instances(&mut self, request: &DrawRequest<'_, M>) {
        self.draws.push(RecordedDraw {
            level: request.level,
            mesh: request.mesh,
            material: request.material,
            matrices: request.matrices.to_vec(),
            bounds: request.bounds,
            constants: *request.constants,
        });
    }
}

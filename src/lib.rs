mod config;
mod error;
mod hierarchy;
mod level_update;
mod matrix_operations;
mod packing;
mod part;


pub use config::{
    Color, DegreeRange, FractalConfig, Gradient, MaterialHandle, MeshHandle, MotionRanges,
    DEFAULT_DEPTH, MAX_DEPTH, SIMPLE_SPIN_DEGREES_PER_SECOND,
};
pub use error::{FractalError, Result};
pub use hierarchy::Tree;
pub use level_update::{
    level_scale, sagged_base_rotation, update_level, update_level_serial, update_part,
    update_root, update_tree, RootTransform,
};
pub use matrix_operations::{rotate_around_up, IDENTITY_ROTATION, UP};
pub use packing::{
    gradient_interpolator, level_appearances, submit_levels, Affine3x4, Affine4x4, Bounds,
    DrawConstants, DrawContext, DrawRequest, InstanceSink, LevelAppearance, MatrixBuffers,
    MeshSelector, MeshSet, PackedMatrix, RecordedDraw, RecordingSink,
};
pub use part::{
    canonical_slots, child_slot, level_len, parent_index, total_part_count, Part, SlotParams,
    BRANCH_LENGTH, CHILD_COUNT, SCALE_FACTOR,
};

use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Everything allocated by one build. Installed as a unit so a failed build
/// leaves nothing behind.
#[derive(Debug)]
struct Built<M> {
    tree: Tree,
    buffers: MatrixBuffers<M>,
    appearances: Vec<LevelAppearance>,
    bounds: Bounds,
}

/// A fractal tree owned by one host object: build/teardown lifecycle plus the
/// per-frame update and draw submission.
#[derive(Debug)]
pub struct FractalTree<M: PackedMatrix = Affine3x4> {
    config: FractalConfig,
    rng: StdRng,
    built: Option<Built<M>>,
}

impl<M: PackedMatrix> FractalTree<M> {
    pub fn new(config: FractalConfig) -> Result<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: FractalConfig, seed: u64) -> Result<Self> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: FractalConfig, rng: StdRng) -> Result<Self> {
        let mut fractal = Self {
            config,
            rng,
            built: None,
        };
        fractal.build()?;
        Ok(fractal)
    }

    pub fn config(&self) -> &FractalConfig {
        &self.config
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Allocates every level for the current config, replacing any previous
    /// build only once the new one has fully succeeded.
    pub fn build(&mut self) -> Result<()> {
        self.config.validate()?;
        let depth = self.config.depth;
        let tree = Tree::build(depth, &canonical_slots(), &self.config.motion(), &mut self.rng)?;
        let buffers = MatrixBuffers::allocate(depth)?;
        let appearances = level_appearances(&self.config, &mut self.rng);
        debug!(
            "fractal ready: depth {} parts {} matrix bytes {}",
            depth,
            tree.part_count(),
            buffers.byte_size()
        );
        self.built = Some(Built {
            tree,
            buffers,
            appearances,
            bounds: Bounds::around_root(cgmath::Vector3::new(0.0, 0.0, 0.0), 1.0),
        });
        Ok(())
    }

    /// Releases all level storage. Reads fail with `NotBuilt` until the next
    /// `build`.
    pub fn teardown(&mut self) {
        if let Some(mut built) = self.built.take() {
            built.tree.teardown();
        }
    }

    /// Tears down and rebuilds when `config` changes anything fixed at build
    /// time; otherwise just adopts the new draw-time handles. Returns whether a
    /// rebuild happened.
    pub fn rebuild_if_structural_params_changed(&mut self, config: FractalConfig) -> Result<bool> {
        config.validate()?;
        let rebuild = !self.is_built() || self.config.structurally_differs(&config);
        self.config = config;
        if !rebuild {
            return Ok(false);
        }
        debug!("structural config change, rebuilding at depth {}", self.config.depth);
        self.teardown();
        self.build()?;
        Ok(true)
    }

    fn built(&self) -> Result<&Built<M>> {
        self.built.as_ref().ok_or(FractalError::NotBuilt)
    }

    pub fn tree(&self) -> Result<&Tree> {
        Ok(&self.built()?.tree)
    }

    pub fn depth(&self) -> Result<usize> {
        Ok(self.built()?.tree.depth())
    }

    pub fn level(&self, level: usize) -> Result<&[Part]> {
        self.built()?.tree.level(level)
    }

    /// Matrices published by the last completed frame.
    pub fn level_matrices(&self, level: usize) -> Result<&[M]> {
        self.built()?.buffers.front(level)
    }

    pub fn level_matrix_bytes(&self, level: usize) -> Result<&[u8]> {
        self.built()?.buffers.front_bytes(level)
    }

    pub fn appearance(&self, level: usize) -> Result<&LevelAppearance> {
        let built = self.built()?;
        built.appearances.get(level).ok_or(FractalError::LevelOutOfRange {
            level,
            depth: built.tree.depth(),
        })
    }

    /// Bounds of the last completed frame; a unit-scale box at the origin
    /// before the first one.
    pub fn bounds(&self) -> Result<Bounds> {
        Ok(self.built()?.bounds)
    }

    pub fn frames(&self) -> Result<u64> {
        Ok(self.built()?.buffers.frames())
    }

    /// Recomputes every part for this frame and publishes the new matrices.
    pub fn update(&mut self, root: &RootTransform, dt: f32) -> Result<()> {
        if dt < 0.0 {
            warn!("negative frame delta {dt}, spin held");
        }
        let built = self.built.as_mut().ok_or(FractalError::NotBuilt)?;
        update_tree(built.tree.levels_mut()?, built.buffers.back_mut(), root, dt)?;
        built.buffers.swap();
        built.bounds = Bounds::around_root(root.position, root.scale);
        trace!("fractal frame {} updated", built.buffers.frames());
        Ok(())
    }

    /// Hands one instanced draw per level to `sink`, in level order.
    pub fn submit<S>(&self, context: &mut DrawContext, sink: &mut S) -> Result<()>
    where
        S: InstanceSink<M> + ?Sized,
    {
        let built = self.built()?;
        submit_levels(
            &built.buffers,
            &built.appearances,
            &MeshSet::from_config(&self.config),
            built.bounds,
            context,
            sink,
        )
    }

    pub fn frame<S>(
        &mut self,
        root: &RootTransform,
        dt: f32,
        context: &mut DrawContext,
        sink: &mut S,
    ) -> Result<()>
    where
        S: InstanceSink<M> + ?Sized,
    {
        self.update(root, dt)?;
        self.submit(context, sink)
    }
}

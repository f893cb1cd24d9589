use log::debug;
use rand::Rng;

use crate::config::{MotionRanges, MAX_DEPTH};
use crate::error::{FractalError, Result};
use crate::part::{level_len, Part, SlotParams, CHILD_COUNT};

/// Arena of levels. Level `L` holds `5^L` parts; part `i` of level `L` is
/// the child in slot `i % 5` of part `i / 5` in level `L - 1`.
#[derive(Clone, Debug, Default)]
pub struct Tree {
    levels: Vec<Vec<Part>>,
}

impl Tree {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Allocates and fills every level. Nothing is kept if any level fails to
    /// allocate.
    pub fn build<R: Rng + ?Sized>(
        depth: usize,
        slots: &[SlotParams; CHILD_COUNT],
        motion: &MotionRanges,
        rng: &mut R,
    ) -> Result<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(FractalError::InvalidDepth {
                depth,
                max: MAX_DEPTH,
            });
        }

        let mut levels = Vec::new();
        levels
            .try_reserve_exact(depth)
            .map_err(|_| FractalError::Allocation { level: 0, len: depth })?;

        for level_index in 0..depth {
            let len = level_len(level_index).ok_or(FractalError::InvalidDepth {
                depth,
                max: MAX_DEPTH,
            })?;
            let mut level = Vec::new();
            level
                .try_reserve_exact(len)
                .map_err(|_| FractalError::Allocation { level: level_index, len })?;

            if level_index == 0 {
                level.push(Part::random(&slots[0], motion, rng));
            } else {
                for _ in 0..len / CHILD_COUNT {
                    for slot in slots {
                        level.push(Part::random(slot, motion, rng));
                    }
                }
            }
            levels.push(level);
        }

        let tree = Self { levels };
        debug!(
            "built fractal tree: depth {} parts {} ({} bytes)",
            depth,
            tree.part_count(),
            tree.part_count() * std::mem::size_of::<Part>()
        );
        Ok(tree)
    }

    /// Releases every level. No-op on an empty tree.
    pub fn teardown(&mut self) {
        if self.levels.is_empty() {
            return;
        }
        debug!("tearing down fractal tree of depth {}", self.levels.len());
        self.levels = Vec::new();
    }

    pub fn is_built(&self) -> bool {
        !self.levels.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn part_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn level(&self, level: usize) -> Result<&[Part]> {
        if !self.is_built() {
            return Err(FractalError::NotBuilt);
        }
        self.levels
            .get(level)
            .map(Vec::as_slice)
            .ok_or(FractalError::LevelOutOfRange {
                level,
                depth: self.depth(),
            })
    }

    pub fn root(&self) -> Result<&Part> {
        Ok(&self.level(0)?[0])
    }

    pub fn levels_mut(&mut self) -> Result<&mut [Vec<Part>]> {
        if !self.is_built() {
            return Err(FractalError::NotBuilt);
        }
        Ok(&mut self.levels)
    }
}

//! Multi-resolution image pyramid.

use burn::tensor::backend::Backend;
use std::collections::HashMap;

use super::scale::ScaleFilter;
use crate::field::ScalarField;
use crate::grid::GridSize;
use crate::image::Image;

/// Grid sizes of a coarse-to-fine schedule.
///
/// Level `L` of `levels` shrinks the full grid by `2^(levels - 1 - L)`
/// (rounded up). An axis never shrinks below `min_extent` voxels unless it
/// is shorter than that to begin with. Levels are ordered coarsest first and
/// the last one is always `full`.
pub fn level_sizes<const D: usize>(
    full: GridSize<D>,
    levels: usize,
    min_extent: usize,
) -> Vec<GridSize<D>> {
    let levels = levels.max(1);
    (0..levels)
        .map(|level| {
            let shift = (levels - 1 - level).min(usize::BITS as usize - 1);
            let coarse = full.downscaled(1usize << shift).dims();
            let mut dims = full.dims();
            for axis in 0..D {
                dims[axis] = coarse[axis].max(min_extent.min(dims[axis]));
            }
            GridSize::new(dims)
        })
        .collect()
}

/// Lazily built pyramid of one input image.
///
/// Levels are produced on request for any grid size and cached on the host
/// until [`ImagePyramid::clear`].
#[derive(Debug)]
pub struct ImagePyramid<B: Backend, const D: usize> {
    image: Image<B, D>,
    levels: HashMap<GridSize<D>, ScalarField<D>>,
}

impl<B: Backend, const D: usize> ImagePyramid<B, D> {
    pub fn new(image: Image<B, D>) -> Self {
        Self {
            image,
            levels: HashMap::new(),
        }
    }

    /// The full resolution image.
    pub fn image(&self) -> &Image<B, D> {
        &self.image
    }

    pub fn full_size(&self) -> GridSize<D> {
        self.image.grid_size()
    }

    /// Host image at `size`, built on first use.
    pub fn level(&mut self, size: GridSize<D>) -> &ScalarField<D> {
        let image = &self.image;
        self.levels.entry(size).or_insert_with(|| {
            tracing::debug!("Building pyramid level {} from {}", size, image.grid_size());
            ScaleFilter::new().apply(image, size)
        })
    }

    /// Number of cached levels.
    pub fn cached_levels(&self) -> usize {
        self.levels.len()
    }

    /// Drop every cached level.
    pub fn clear(&mut self) {
        self.levels.clear();
    }

    /// Replace the input image and drop the cache.
    pub fn replace(&mut self, image: Image<B, D>) {
        self.image = image;
        self.levels.clear();
    }
}

//! Tiled data blocks and the arena that owns them
//!
//! A [`Data`] block is partitioned at declaration time into fixed-size basis
//! tiles. Tiles are the unit of aliasing: two views can only overlap if they
//! touch a common tile, which turns every dependency question into a small
//! set intersection.
//!
//! # Tiling
//!
//! Along each dimension the nominal tile size is
//! `max(extent / frequency, frequency)`. The last tile of a dimension takes
//! whatever remains, so a 513-element block tiled with frequency 32 has 16
//! tiles of 32 elements and one tile of 1 element.

use crate::error::{Result, SimError};
use crate::view::View;
use serde::Serialize;
use std::collections::BTreeSet;
use std::ops::Range;

/// Supported element kinds of a data block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ElementKind {
    F64,
    F32,
    I64,
    I32,
}

impl ElementKind {
    pub fn size_bytes(self) -> usize {
        match self {
            ElementKind::F64 | ElementKind::I64 => 8,
            ElementKind::F32 | ElementKind::I32 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DataId(pub usize);

/// Basis tile handle: the tile's row-major position within its block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileId {
    pub data: DataId,
    pub index: usize,
}

#[derive(Clone, Debug)]
pub struct Data {
    id: DataId,
    identifier: String,
    kind: ElementKind,
    shape: Vec<usize>,
    tile_size: Vec<usize>,
    tiles_per_dim: Vec<usize>,
    basis: Vec<View>,
}

impl Data {
    /// Validate the shape and build the basis tiles.
    ///
    /// Only rank 1 and rank 2 blocks are supported and every extent must be
    /// non-zero.
    pub fn declare(
        id: DataId,
        identifier: &str,
        kind: ElementKind,
        shape: &[usize],
        frequency: usize,
    ) -> Result<Self> {
        let invalid = |reason: &str| SimError::InvalidShape {
            identifier: identifier.to_string(),
            reason: reason.to_string(),
        };
        if shape.is_empty() || shape.len() > 2 {
            return Err(invalid("only rank 1 and rank 2 data are supported"));
        }
        if shape.contains(&0) {
            return Err(invalid("extents must be non-zero"));
        }
        if frequency == 0 {
            return Err(invalid("interpolation frequency must be at least 1"));
        }

        let tile_size: Vec<usize> = shape
            .iter()
            .map(|&extent| std::cmp::max(extent / frequency, frequency))
            .collect();
        let tiles_per_dim: Vec<usize> = shape
            .iter()
            .zip(&tile_size)
            .map(|(&extent, &tile)| (extent + tile - 1) / tile)
            .collect();

        let rows = starts(shape[0], tile_size[0]);
        let basis = match shape.len() {
            1 => rows
                .map(|r| View::new(id, kind, vec![r.start], vec![r.end]))
                .collect(),
            _ => rows
                .flat_map(|r| {
                    starts(shape[1], tile_size[1]).map(move |c| {
                        View::new(id, kind, vec![r.start, c.start], vec![r.end, c.end])
                    })
                })
                .collect(),
        };

        Ok(Data {
            id,
            identifier: identifier.to_string(),
            kind,
            shape: shape.to_vec(),
            tile_size,
            tiles_per_dim,
            basis,
        })
    }

    pub fn id(&self) -> DataId {
        self.id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn tile_size(&self) -> &[usize] {
        &self.tile_size
    }

    pub fn tiles_per_dim(&self) -> &[usize] {
        &self.tiles_per_dim
    }

    pub fn basis(&self) -> &[View] {
        &self.basis
    }

    /// Total number of elements in the block
    pub fn elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn full(&self) -> View {
        View::new(self.id, self.kind, vec![0; self.rank()], self.shape.clone())
    }

    /// Rectangular sub-range given as one range per dimension.
    pub fn slice(&self, ranges: &[Range<usize>]) -> Result<View> {
        if ranges.len() != self.rank() {
            return Err(SimError::InvalidShape {
                identifier: self.identifier.clone(),
                reason: format!("slice of rank {} on rank {} data", ranges.len(), self.rank()),
            });
        }
        for (range, &extent) in ranges.iter().zip(&self.shape) {
            if range.start > range.end || range.end > extent {
                return Err(SimError::OutOfBounds {
                    begin: range.start,
                    end: range.end,
                    extent,
                });
            }
        }
        Ok(View::new(
            self.id,
            self.kind,
            ranges.iter().map(|r| r.start).collect(),
            ranges.iter().map(|r| r.end).collect(),
        ))
    }

    /// Single index along the first dimension; rank-2 elements span the
    /// full second dimension.
    pub fn element(&self, index: usize) -> Result<View> {
        if index >= self.shape[0] {
            return Err(SimError::OutOfBounds {
                begin: index,
                end: index + 1,
                extent: self.shape[0],
            });
        }
        let mut begins = vec![0; self.rank()];
        let mut ends = self.shape.clone();
        begins[0] = index;
        ends[0] = index + 1;
        Ok(View::new(self.id, self.kind, begins, ends))
    }

    /// Basis tiles touched by `view`.
    ///
    /// Per dimension the tile range is `[floor(begin/tile), ceil(end/tile))`;
    /// rank-2 tiles are numbered row-major.
    pub fn basis_of(&self, view: &View) -> Result<BTreeSet<TileId>> {
        if view.data() != self.id {
            return Err(SimError::DataMismatch(view.data(), self.id));
        }
        let span = |dim: usize| {
            let (begin, end) = (view.begins()[dim], view.ends()[dim]);
            if begin >= end {
                return 0..0;
            }
            let tile = self.tile_size[dim];
            begin / tile..(end + tile - 1) / tile
        };

        let tile = |index| TileId {
            data: self.id,
            index,
        };
        let tiles = match self.rank() {
            1 => span(0).map(tile).collect(),
            _ => {
                let per_row = self.tiles_per_dim[1];
                let columns = span(1);
                span(0)
                    .flat_map(|i| columns.clone().map(move |j| i * per_row + j))
                    .map(tile)
                    .collect()
            }
        };
        Ok(tiles)
    }
}

fn starts(extent: usize, tile: usize) -> impl Iterator<Item = Range<usize>> {
    (0..extent)
        .step_by(tile)
        .map(move |start| start..std::cmp::min(start + tile, extent))
}

// ============================================================================
// Arena
// ============================================================================

/// Owns every declared data block; views refer back through [`DataId`].
#[derive(Clone, Debug, Default)]
pub struct DataSpace {
    blocks: Vec<Data>,
}

impl DataSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a new block and return a view over all of it.
    pub fn declare(
        &mut self,
        identifier: &str,
        kind: ElementKind,
        shape: &[usize],
        frequency: usize,
    ) -> Result<View> {
        let data = Data::declare(DataId(self.blocks.len()), identifier, kind, shape, frequency)?;
        let view = data.full();
        self.blocks.push(data);
        Ok(view)
    }

    pub fn get(&self, id: DataId) -> Result<&Data> {
        self.blocks.get(id.0).ok_or(SimError::UnknownData(id))
    }

    pub fn blocks(&self) -> &[Data] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn basis_of(&self, view: &View) -> Result<BTreeSet<TileId>> {
        self.get(view.data())?.basis_of(view)
    }

    pub fn tile(&self, id: TileId) -> Result<&View> {
        let data = self.get(id.data)?;
        data.basis.get(id.index).ok_or(SimError::OutOfBounds {
            begin: id.index,
            end: id.index + 1,
            extent: data.basis.len(),
        })
    }

    /// Whether two views can be used without ordering between them.
    ///
    /// Views of different element kinds or different blocks never alias;
    /// otherwise they are disjoint iff they share no basis tile.
    pub fn disjoint(&self, a: &View, b: &View) -> Result<bool> {
        if a.kind() != b.kind() || a.data() != b.data() {
            return Ok(true);
        }
        let data = self.get(a.data())?;
        let left = data.basis_of(a)?;
        let right = data.basis_of(b)?;
        Ok(left.is_disjoint(&right))
    }
}

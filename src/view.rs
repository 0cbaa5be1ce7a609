//! Rectangular sub-ranges of a data block

use crate::data::{DataId, ElementKind};
use crate::error::{Result, SimError};
use serde::Serialize;

/// A half-open box `[begins, ends)` into one data block.
///
/// Views do not own data; they carry the block's [`DataId`] and element kind
/// and are resolved against a [`crate::data::DataSpace`] when tiles are needed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct View {
    data: DataId,
    kind: ElementKind,
    begins: Vec<usize>,
    ends: Vec<usize>,
}

impl View {
    pub(crate) fn new(data: DataId, kind: ElementKind, begins: Vec<usize>, ends: Vec<usize>) -> Self {
        View {
            data,
            kind,
            begins,
            ends,
        }
    }

    pub fn data(&self) -> DataId {
        self.data
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn rank(&self) -> usize {
        self.begins.len()
    }

    pub fn begins(&self) -> &[usize] {
        &self.begins
    }

    pub fn ends(&self) -> &[usize] {
        &self.ends
    }

    pub fn shape(&self) -> Vec<usize> {
        self.begins
            .iter()
            .zip(&self.ends)
            .map(|(b, e)| e.saturating_sub(*b))
            .collect()
    }

    pub fn elements(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn bytes(&self) -> usize {
        self.elements() * self.kind.size_bytes()
    }

    /// Size in kilobytes (10^3 bytes), the unit the cost model works in
    pub fn kbytes(&self) -> f64 {
        self.bytes() as f64 / 1000.0
    }

    /// The `index`-th row of this view, keeping its column range.
    pub fn row(&self, index: usize) -> Result<View> {
        let rows = self.shape()[0];
        if index >= rows {
            return Err(SimError::OutOfBounds {
                begin: index,
                end: index + 1,
                extent: rows,
            });
        }
        let mut begins = self.begins.clone();
        let mut ends = self.ends.clone();
        begins[0] += index;
        ends[0] = begins[0] + 1;
        Ok(View::new(self.data, self.kind, begins, ends))
    }

    /// Bounding box of two views of the same block.
    pub fn join(&self, other: &View) -> Result<View> {
        if self.data != other.data {
            return Err(SimError::DataMismatch(self.data, other.data));
        }
        let begins = self
            .begins
            .iter()
            .zip(&other.begins)
            .map(|(a, b)| *a.min(b))
            .collect();
        let ends = self
            .ends
            .iter()
            .zip(&other.ends)
            .map(|(a, b)| *a.max(b))
            .collect();
        Ok(View::new(self.data, self.kind, begins, ends))
    }
}

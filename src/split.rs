//! Contiguous partitions of a pattern's index domain

use crate::error::{Result, SimError};
use crate::pattern::{Pattern, PatternId};
use crate::view::View;
use serde::Serialize;

/// Step-local split handle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SplitId(pub usize);

/// The indices `[begin, end)` of one pattern, with the data they touch.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternSplit {
    id: SplitId,
    pattern: PatternId,
    begin: usize,
    end: usize,
    consumes: Vec<View>,
    produces: Vec<View>,
}

impl PatternSplit {
    pub(crate) fn new(
        id: SplitId,
        pattern: PatternId,
        begin: usize,
        end: usize,
        consumes: Vec<View>,
        produces: Vec<View>,
    ) -> Self {
        PatternSplit {
            id,
            pattern,
            begin,
            end,
            consumes,
            produces,
        }
    }

    /// A split covering the whole domain with the pattern's own views.
    pub(crate) fn whole(id: SplitId, pattern: &Pattern) -> Self {
        Self::new(
            id,
            pattern.id(),
            0,
            pattern.width(),
            pattern.consumes().to_vec(),
            pattern.produces().to_vec(),
        )
    }

    pub fn id(&self) -> SplitId {
        self.id
    }

    pub fn pattern(&self) -> PatternId {
        self.pattern
    }

    pub fn begin(&self) -> usize {
        self.begin
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn width(&self) -> usize {
        self.end - self.begin
    }

    pub fn consumes(&self) -> &[View] {
        &self.consumes
    }

    pub fn produces(&self) -> &[View] {
        &self.produces
    }

    /// Cost of the range: the mean of both boundary indices (touched
    /// exactly) times the width.
    pub fn flops(&self, pattern: &Pattern) -> Result<f64> {
        if pattern.id() != self.pattern {
            return Err(SimError::InvalidSplit {
                pattern: pattern.identifier().to_string(),
                reason: format!("split {:?} belongs to {:?}", self.id, self.pattern),
            });
        }
        if self.width() == 0 {
            return Ok(0.0);
        }
        let first = pattern.flops(self.begin, true)?;
        let last = pattern.flops(self.end - 1, true)?;
        Ok((first + last) / 2.0 * self.width() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataSpace, ElementKind};
    use crate::pattern::functors::{ConstantCost, LinearEstimate};

    #[test]
    fn test_whole_split_mirrors_pattern() {
        let mut space = DataSpace::new();
        let field = space.declare("a", ElementKind::F64, &[100], 32).unwrap();
        let pattern = Pattern::create(PatternId(4), "c", Box::new(ConstantCost), field, 2).unwrap();

        let split = PatternSplit::whole(SplitId(0), &pattern);
        assert_eq!(split.pattern(), PatternId(4));
        assert_eq!((split.begin(), split.end()), (0, 100));
        assert_eq!(split.consumes(), pattern.consumes());
        assert_eq!(split.flops(&pattern).unwrap(), 100.0);
    }

    #[test]
    fn test_flops_uses_boundary_mean() {
        let mut space = DataSpace::new();
        let field = space.declare("a", ElementKind::F64, &[100], 32).unwrap();
        let pattern = Pattern::create(PatternId(0), "l", Box::new(LinearEstimate), field, 1).unwrap();

        let split = PatternSplit::new(SplitId(1), PatternId(0), 10, 20, vec![], vec![]);
        // (23 + 41) / 2 * 10
        assert_eq!(split.flops(&pattern).unwrap(), 320.0);
        assert!(pattern.is_sampled(10) && pattern.is_sampled(19));

        let empty = PatternSplit::new(SplitId(2), PatternId(0), 30, 30, vec![], vec![]);
        assert_eq!(empty.flops(&pattern).unwrap(), 0.0);
    }
}

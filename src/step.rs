//! Groups of mutually independent patterns and their schedule
//!
//! A [`Step`] owns the patterns fused into it and the splits those patterns
//! are currently partitioned into. A scheduler assigns every split to a
//! [`Team`]; the step keeps the split→team map and its team→splits reverse
//! index consistent at all times.

use crate::cluster::{Team, TeamId};
use crate::data::DataSpace;
use crate::error::{Result, SimError};
use crate::pattern::{Pattern, PatternId};
use crate::split::{PatternSplit, SplitId};
use log::debug;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct Step {
    index: usize,
    patterns: Vec<Pattern>,
    splits: Vec<PatternSplit>,
    next_split: usize,
    assignment: BTreeMap<SplitId, Team>,
    reverse_assignment: BTreeMap<TeamId, Vec<SplitId>>,
    /// Teams in the order they first received a split
    team_order: Vec<TeamId>,
}

impl Step {
    pub(crate) fn new(index: usize) -> Self {
        Step {
            index,
            patterns: Vec::new(),
            splits: Vec::new(),
            next_split: 0,
            assignment: BTreeMap::new(),
            reverse_assignment: BTreeMap::new(),
            team_order: Vec::new(),
        }
    }

    /// Position of the step in the compiled sequence
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of patterns in the step
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn pattern(&self, id: PatternId) -> Result<&Pattern> {
        self.patterns
            .iter()
            .find(|p| p.id() == id)
            .ok_or(SimError::UnknownPattern(id.0, self.index))
    }

    pub fn splits(&self) -> &[PatternSplit] {
        &self.splits
    }

    pub fn split_by_id(&self, id: SplitId) -> Result<&PatternSplit> {
        self.splits
            .iter()
            .find(|s| s.id() == id)
            .ok_or(SimError::UnknownSplit(id.0, self.index))
    }

    pub fn splits_of(&self, pattern: PatternId) -> Vec<&PatternSplit> {
        self.splits.iter().filter(|s| s.pattern() == pattern).collect()
    }

    fn next_split_id(&mut self) -> SplitId {
        let id = SplitId(self.next_split);
        self.next_split += 1;
        id
    }

    /// Add a pattern with one split covering its whole domain.
    pub(crate) fn add_pattern(&mut self, pattern: Pattern) {
        let id = self.next_split_id();
        self.splits.push(PatternSplit::whole(id, &pattern));
        self.patterns.push(pattern);
    }

    /// Whether `pattern` must wait for this step.
    ///
    /// True iff something produced here aliases something `pattern` reads.
    /// Two writers of the same tile are not ordered against each other.
    pub fn happens_before(&self, pattern: &Pattern, space: &DataSpace) -> Result<bool> {
        for produced in self.patterns.iter().flat_map(|p| p.produces()) {
            for consumed in pattern.consumes() {
                if !space.disjoint(produced, consumed)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    // ========================================================================
    // Splitting
    // ========================================================================

    /// Replace the splits of `pattern` with contiguous ranges of the given sizes.
    ///
    /// Every new split reads the join of the subviews of its first and last
    /// index, and writes the join of their produced rows. Prior splits of the
    /// pattern and their assignments are dropped.
    pub fn split(&mut self, pattern: PatternId, sizes: &[usize]) -> Result<Vec<SplitId>> {
        let (width, identifier) = {
            let p = self.pattern(pattern)?;
            (p.width(), p.identifier().to_string())
        };
        let invalid = |reason: String| SimError::InvalidSplit {
            pattern: identifier.clone(),
            reason,
        };
        if sizes.contains(&0) {
            return Err(invalid("split sizes must be non-zero".to_string()));
        }
        let total: usize = sizes.iter().sum();
        if total != width {
            return Err(invalid(format!("sizes sum to {} but width is {}", total, width)));
        }

        let mut built = Vec::with_capacity(sizes.len());
        {
            let p = self.pattern(pattern)?;
            let mut begin = 0;
            for &size in sizes {
                let end = begin + size;
                let consumes = p
                    .consumes()
                    .iter()
                    .map(|view| {
                        let first = p.subflow_in(begin, view.data())?;
                        let last = p.subflow_in(end - 1, view.data())?;
                        first.join(&last)
                    })
                    .collect::<Result<Vec<_>>>()?;
                let produces = vec![p.subflow_out(begin)?.join(&p.subflow_out(end - 1)?)?];
                built.push((begin, end, consumes, produces));
                begin = end;
            }
        }

        self.free_pattern(pattern)?;
        self.splits.retain(|s| s.pattern() != pattern);
        let mut ids = Vec::with_capacity(built.len());
        for (begin, end, consumes, produces) in built {
            let id = self.next_split_id();
            self.splits
                .push(PatternSplit::new(id, pattern, begin, end, consumes, produces));
            ids.push(id);
        }
        debug!(
            "Step {}: split '{}' into {} ranges",
            self.index,
            identifier,
            ids.len()
        );
        Ok(ids)
    }

    /// Split into `n` ranges of `width / n` indices plus a trailing range for
    /// the remainder, if any.
    pub fn split_even(&mut self, pattern: PatternId, n: usize) -> Result<Vec<SplitId>> {
        let p = self.pattern(pattern)?;
        let width = p.width();
        if n == 0 || n > width {
            return Err(SimError::InvalidSplit {
                pattern: p.identifier().to_string(),
                reason: format!("cannot split width {} into {} parts", width, n),
            });
        }
        let chunk = width / n;
        let mut sizes = vec![chunk; n];
        let remainder = width - n * chunk;
        if remainder > 0 {
            sizes.push(remainder);
        }
        self.split(pattern, &sizes)
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Assign one split to a team, replacing any earlier assignment.
    pub fn assign(&mut self, split: SplitId, team: &Team) -> Result<()> {
        self.split_by_id(split)?;
        self.free(split)?;
        self.assignment.insert(split, team.clone());
        let splits = self.reverse_assignment.entry(team.id()).or_default();
        if splits.is_empty() {
            self.team_order.push(team.id());
        }
        splits.push(split);
        Ok(())
    }

    /// Assign every split of a pattern to the same team.
    pub fn assign_pattern(&mut self, pattern: PatternId, team: &Team) -> Result<()> {
        let ids: Vec<SplitId> = self.splits_of(pattern).iter().map(|s| s.id()).collect();
        if ids.is_empty() {
            self.pattern(pattern)?;
        }
        for id in ids {
            self.assign(id, team)?;
        }
        Ok(())
    }

    /// Drop the assignment of one split; a no-op if it has none.
    pub fn free(&mut self, split: SplitId) -> Result<()> {
        self.split_by_id(split)?;
        if let Some(team) = self.assignment.remove(&split) {
            if let Some(splits) = self.reverse_assignment.get_mut(&team.id()) {
                splits.retain(|s| *s != split);
                if splits.is_empty() {
                    self.reverse_assignment.remove(&team.id());
                    self.team_order.retain(|t| *t != team.id());
                }
            }
        }
        Ok(())
    }

    pub fn free_pattern(&mut self, pattern: PatternId) -> Result<()> {
        let ids: Vec<SplitId> = self.splits_of(pattern).iter().map(|s| s.id()).collect();
        for id in ids {
            self.free(id)?;
        }
        Ok(())
    }

    pub fn assignment(&self, split: SplitId) -> Option<&Team> {
        self.assignment.get(&split)
    }

    /// Splits assigned to a team, in assignment order
    pub fn assigned(&self, team: TeamId) -> Vec<&PatternSplit> {
        self.reverse_assignment
            .get(&team)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.splits.iter().find(|s| s.id() == *id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Teams holding at least one split, in order of first assignment
    pub fn teams(&self) -> Vec<&Team> {
        self.team_order
            .iter()
            .filter_map(|team| self.reverse_assignment.get(team))
            .filter_map(|ids| ids.first())
            .filter_map(|id| self.assignment.get(id))
            .collect()
    }

    pub fn assigned_count(&self) -> usize {
        self.assignment.len()
    }

    /// True iff every split has a team.
    pub fn complete(&self) -> bool {
        self.splits.len() == self.assignment.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ProcessorId;
    use crate::data::ElementKind;
    use crate::pattern::functors::{ConstantCost, RowReader};
    use crate::view::View;

    fn step_with(space: &mut DataSpace, width: usize) -> (Step, PatternId, View) {
        let field = space.declare("a", ElementKind::F64, &[width], 32).unwrap();
        let pattern = Pattern::create(PatternId(0), "p", Box::new(ConstantCost), field.clone(), 2).unwrap();
        let mut step = Step::new(0);
        step.add_pattern(pattern);
        (step, PatternId(0), field)
    }

    #[test]
    fn test_add_pattern_creates_whole_split() {
        let mut space = DataSpace::new();
        let (step, id, _) = step_with(&mut space, 100);
        assert_eq!(step.len(), 1);
        let splits = step.splits_of(id);
        assert_eq!(splits.len(), 1);
        assert_eq!((splits[0].begin(), splits[0].end()), (0, 100));
        assert!(!step.complete());
    }

    #[test]
    fn test_split_even_with_remainder() {
        let mut space = DataSpace::new();
        let (mut step, id, _) = step_with(&mut space, 130);
        step.split_even(id, 4).unwrap();

        let ranges: Vec<(usize, usize)> = step.splits().iter().map(|s| (s.begin(), s.end())).collect();
        assert_eq!(ranges, vec![(0, 32), (32, 64), (64, 96), (96, 128), (128, 130)]);
    }

    #[test]
    fn test_split_even_exact() {
        let mut space = DataSpace::new();
        let (mut step, id, _) = step_with(&mut space, 100);
        let ids = step.split_even(id, 4).unwrap();
        assert_eq!(ids.len(), 4, "no empty trailing split");
        assert!(step.split_even(id, 0).is_err());
        assert!(step.split_even(id, 101).is_err());
    }

    #[test]
    fn test_split_sizes_must_cover_domain() {
        let mut space = DataSpace::new();
        let (mut step, id, _) = step_with(&mut space, 100);
        assert!(step.split(id, &[50, 40]).is_err());
        assert!(step.split(id, &[50, 0, 50]).is_err());
        assert_eq!(step.splits().len(), 1, "failed split leaves splits untouched");
    }

    #[test]
    fn test_split_uses_boundary_subviews() {
        let mut space = DataSpace::new();
        let field = space.declare("a", ElementKind::F64, &[128], 32).unwrap();
        let other = space.declare("b", ElementKind::F64, &[128, 4], 32).unwrap();
        let pattern = Pattern::create(
            PatternId(7),
            "rows",
            Box::new(RowReader { other: other.clone() }),
            field.clone(),
            2,
        )
        .unwrap();
        let mut step = Step::new(0);
        step.add_pattern(pattern);

        let ids = step.split(PatternId(7), &[32, 96]).unwrap();
        let second = step.split_by_id(ids[1]).unwrap();
        assert_eq!(second.consumes()[0], field, "field falls back to the full view");
        assert_eq!(second.consumes()[1].begins(), &[32, 0]);
        assert_eq!(second.consumes()[1].ends(), &[128, 4]);
        assert_eq!(second.produces()[0].begins(), &[32]);
        assert_eq!(second.produces()[0].ends(), &[128]);
    }

    #[test]
    fn test_assign_and_free() {
        let mut space = DataSpace::new();
        let (mut step, id, _) = step_with(&mut space, 100);
        let team = Team::new(ProcessorId(0), 24);
        let split = step.splits()[0].id();

        step.assign(split, &team).unwrap();
        assert!(step.complete());
        assert_eq!(step.assignment(split), Some(&team));
        assert_eq!(step.assigned(team.id()).len(), 1);
        assert_eq!(step.teams(), vec![&team]);

        step.free(split).unwrap();
        assert!(!step.complete());
        assert_eq!(step.assignment(split), None);
        assert!(step.assigned(team.id()).is_empty());
        assert!(step.teams().is_empty());

        step.assign_pattern(id, &team).unwrap();
        step.free_pattern(id).unwrap();
        assert_eq!(step.assigned_count(), 0);
    }

    #[test]
    fn test_reassign_moves_split() {
        let mut space = DataSpace::new();
        let (mut step, id, _) = step_with(&mut space, 100);
        let team_a = Team::new(ProcessorId(0), 1);
        let team_b = Team::new(ProcessorId(0), 1);
        let split = step.splits_of(id)[0].id();

        step.assign(split, &team_a).unwrap();
        step.assign(split, &team_a).unwrap();
        assert_eq!(step.assigned(team_a.id()).len(), 1, "no duplicate edges");

        step.assign(split, &team_b).unwrap();
        assert!(step.assigned(team_a.id()).is_empty());
        assert_eq!(step.assigned(team_b.id()).len(), 1);
        assert_eq!(step.assignment(split), Some(&team_b));
        assert_eq!(step.assigned_count(), 1);
    }

    #[test]
    fn test_resplit_drops_assignments() {
        let mut space = DataSpace::new();
        let (mut step, id, _) = step_with(&mut space, 100);
        let team = Team::new(ProcessorId(0), 1);
        step.assign_pattern(id, &team).unwrap();
        assert!(step.complete());

        step.split_even(id, 2).unwrap();
        assert!(!step.complete());
        assert!(step.teams().is_empty());
        assert!(step.assign(SplitId(0), &team).is_err(), "old split id is gone");
    }

    #[test]
    fn test_happens_before() {
        let mut space = DataSpace::new();
        let a = space.declare("a", ElementKind::F64, &[64], 32).unwrap();
        let b = space.declare("b", ElementKind::F64, &[64], 32).unwrap();

        let mut step = Step::new(0);
        step.add_pattern(Pattern::create(PatternId(0), "wa", Box::new(ConstantCost), a.clone(), 2).unwrap());

        let reads_a = Pattern::create(PatternId(1), "ra", Box::new(ConstantCost), a, 2).unwrap();
        let reads_b = Pattern::create(PatternId(2), "rb", Box::new(ConstantCost), b, 2).unwrap();
        assert!(step.happens_before(&reads_a, &space).unwrap());
        assert!(!step.happens_before(&reads_b, &space).unwrap());
    }

    #[test]
    fn test_teams_follow_first_assignment() {
        let mut space = DataSpace::new();
        let (mut step, id, _) = step_with(&mut space, 90);
        let ids = step.split_even(id, 3).unwrap();
        let early = Team::new(ProcessorId(0), 4);
        let late = Team::new(ProcessorId(1), 4);
        assert!(early.id() < late.id());

        step.assign(ids[0], &late).unwrap();
        step.assign(ids[1], &early).unwrap();
        step.assign(ids[2], &late).unwrap();
        let order: Vec<TeamId> = step.teams().iter().map(|t| t.id()).collect();
        assert_eq!(order, vec![late.id(), early.id()], "ordered by first split, not by id");

        // a team that loses all its splits rejoins at the back
        step.free(ids[0]).unwrap();
        step.free(ids[2]).unwrap();
        step.assign(ids[0], &late).unwrap();
        let order: Vec<TeamId> = step.teams().iter().map(|t| t.id()).collect();
        assert_eq!(order, vec![early.id(), late.id()]);
    }
}

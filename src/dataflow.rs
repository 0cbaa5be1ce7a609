//! Which team holds which basis tile after each step
//!
//! Steps are replayed strictly in order. Reads add the reading team as an
//! additional holder of a tile; writes evict every holder and leave the
//! writer as the only one.

use crate::cluster::{Team, TeamId};
use crate::data::{DataSpace, TileId};
use crate::error::Result;
use crate::step::Step;
use crate::view::View;
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Clone, Debug, Default)]
pub struct DataflowState {
    index: usize,
    owners: BTreeMap<TileId, Vec<Team>>,
    owned: HashMap<TeamId, BTreeSet<TileId>>,
}

impl DataflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the next step this state accepts
    pub fn index(&self) -> usize {
        self.index
    }

    /// Apply the reads and writes of `step`.
    ///
    /// Returns `Ok(false)` without touching the state if `step` is not the
    /// next one in sequence or still has unassigned splits.
    pub fn update(&mut self, step: &Step, space: &DataSpace) -> Result<bool> {
        if step.index() != self.index || !step.complete() {
            debug!(
                "Ignoring dataflow update for step {} (expected {}, complete: {})",
                step.index(),
                self.index,
                step.complete()
            );
            return Ok(false);
        }

        for pattern in step.patterns() {
            for split in step.splits_of(pattern.id()) {
                let team = match step.assignment(split.id()) {
                    Some(team) => team,
                    None => continue,
                };
                for view in split.consumes() {
                    for tile in space.basis_of(view)? {
                        self.read(tile, team);
                    }
                }
                for view in split.produces() {
                    for tile in space.basis_of(view)? {
                        self.write(tile, team);
                    }
                }
            }
        }

        self.index += 1;
        Ok(true)
    }

    fn read(&mut self, tile: TileId, team: &Team) {
        let holders = self.owners.entry(tile).or_default();
        if !holders.iter().any(|t| t.id() == team.id()) {
            holders.push(team.clone());
        }
        self.owned.entry(team.id()).or_default().insert(tile);
    }

    fn write(&mut self, tile: TileId, team: &Team) {
        if let Some(previous) = self.owners.remove(&tile) {
            for holder in previous {
                if let Some(tiles) = self.owned.get_mut(&holder.id()) {
                    tiles.remove(&tile);
                }
            }
        }
        self.owners.insert(tile, vec![team.clone()]);
        self.owned.entry(team.id()).or_default().insert(tile);
    }

    /// Current holders of every tile `view` touches; unheld tiles map to an
    /// empty list.
    pub fn owned_by(&self, view: &View, space: &DataSpace) -> Result<BTreeMap<TileId, Vec<Team>>> {
        Ok(space
            .basis_of(view)?
            .into_iter()
            .map(|tile| (tile, self.owners(tile).to_vec()))
            .collect())
    }

    pub fn owners(&self, tile: TileId) -> &[Team] {
        self.owners.get(&tile).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tiles currently held by `team`
    pub fn owns(&self, team: TeamId) -> BTreeSet<TileId> {
        self.owned.get(&team).cloned().unwrap_or_default()
    }
}

//! Scheduling policies that split and assign the patterns of each step

use crate::cluster::{Cluster, Device, DeviceId, ProcessorId, Team};
use crate::data::DataSpace;
use crate::error::{Result, SimError};
use crate::roofline::{PerformanceModel, RooflineModel};
use crate::step::Step;
use log::{debug, warn};
use std::collections::BTreeMap;

/// A policy that leaves every split of every step assigned to a team.
pub trait Optimizer {
    /// Called once with the full sequence before any step is assigned.
    fn init(&mut self, _steps: &[Step], _space: &DataSpace) -> Result<()> {
        Ok(())
    }

    /// Split and assign the patterns of one step.
    fn assign(&mut self, step: &mut Step, space: &DataSpace) -> Result<()>;

    /// Estimated cost of the assignments made so far
    fn costs(&self) -> f64;
}

/// Runs each step on the single device that finishes it soonest.
///
/// Every pattern is split evenly over the device's processors and each split
/// gets a team owning all cores of its processor. Candidate devices are
/// costed on a copy of a roofline model that has seen all earlier steps, so
/// data locality from previous placements is taken into account.
pub struct GreedyDeviceOptimizer<'c> {
    cluster: &'c Cluster,
    overlap: f64,
    model: RooflineModel<'c>,
    teams: BTreeMap<ProcessorId, Team>,
    choices: Vec<DeviceId>,
}

impl<'c> GreedyDeviceOptimizer<'c> {
    pub fn new(cluster: &'c Cluster) -> Self {
        Self::with_overlap(cluster, crate::roofline::ROOFLINE_OVERLAP)
    }

    pub fn with_overlap(cluster: &'c Cluster, overlap: f64) -> Self {
        GreedyDeviceOptimizer {
            cluster,
            overlap,
            model: RooflineModel::with_overlap(cluster, overlap),
            teams: BTreeMap::new(),
            choices: Vec::new(),
        }
    }

    /// Device picked for each step so far
    pub fn choices(&self) -> &[DeviceId] {
        &self.choices
    }

    pub fn model(&self) -> &RooflineModel<'c> {
        &self.model
    }

    fn place(&self, step: &mut Step, device: &Device) -> Result<()> {
        let teams = device
            .processors
            .iter()
            .map(|p| {
                self.teams.get(p).ok_or_else(|| {
                    SimError::Topology(format!("no team for processor {:?}; call init first", p))
                })
            })
            .collect::<Result<Vec<&Team>>>()?;

        let patterns: Vec<_> = step.patterns().iter().map(|p| (p.id(), p.width())).collect();
        for (pattern, width) in patterns {
            let parts = teams.len().min(width);
            let splits = step.split_even(pattern, parts)?;
            for (i, split) in splits.into_iter().enumerate() {
                step.assign(split, teams[i % parts])?;
            }
        }
        Ok(())
    }
}

impl Optimizer for GreedyDeviceOptimizer<'_> {
    fn init(&mut self, _steps: &[Step], _space: &DataSpace) -> Result<()> {
        self.model = RooflineModel::with_overlap(self.cluster, self.overlap);
        self.choices.clear();
        self.teams = self
            .cluster
            .processors()
            .iter()
            .map(|p| -> Result<(ProcessorId, Team)> {
                if p.frequency <= 0.0 {
                    warn!("Processor '{}' has no clock frequency", p.identifier);
                }
                let node = self.cluster.node(p.node)?;
                let device = self.cluster.device(p.device)?;
                let name = format!("{}/{}/{}", node.identifier, device.identifier, p.identifier);
                Ok((p.id, Team::named(&name, p.id, p.cores)))
            })
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn assign(&mut self, step: &mut Step, space: &DataSpace) -> Result<()> {
        let mut best: Option<(f64, DeviceId)> = None;
        for device in self.cluster.devices() {
            if device.processors.is_empty() {
                continue;
            }
            self.place(step, device)?;
            let mut trial = self.model.clone();
            trial.update(step, space)?;
            let delta = trial.runtime() - self.model.runtime();
            debug!(
                "Step {} on '{}': {:.3e}s",
                step.index(),
                device.identifier,
                delta
            );
            if best.map_or(true, |(cost, _)| delta < cost) {
                best = Some((delta, device.id));
            }
        }

        let (_, chosen) = best
            .ok_or_else(|| SimError::Topology("cluster has no device with processors".to_string()))?;
        let device = self.cluster.device(chosen)?;
        self.place(step, device)?;
        self.model.update(step, space)?;
        self.choices.push(chosen);
        debug!("Step {} placed on '{}'", step.index(), device.identifier);
        Ok(())
    }

    fn costs(&self) -> f64 {
        self.model.runtime()
    }
}

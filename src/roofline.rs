//! Roofline estimate of step runtimes
//!
//! For every team of a step the model estimates
//!
//! - **execution**: split flops spread over `min(width, cores)` cores at the
//!   processor clock, and
//! - **network**: the time to bring every consumed basis tile to the team,
//!   from the closest processor that currently holds it, or from memory if
//!   nobody does.
//!
//! The two are combined as `(1 - min(net / exec, overlap)) * exec + net`;
//! the slowest team determines the step's contribution to the runtime.
//! Tile ownership is tracked by a [`DataflowState`] replayed alongside.

use crate::cluster::{Cluster, DeviceType, Distance, ProcessorId, Team};
use crate::data::DataSpace;
use crate::dataflow::DataflowState;
use crate::error::{Result, SimError};
use crate::split::PatternSplit;
use crate::step::Step;
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// MHz to Hz
pub const FREQUENCY_TO_SECONDS: f64 = 1e6;
/// ns per second
pub const LATENCY_TO_SECONDS: f64 = 1e9;
/// MB/s to KB/s
pub const BANDWIDTH_TO_SECONDS: f64 = 1e3;
/// Default share of transfers hidden behind computation
pub const ROOFLINE_OVERLAP: f64 = 0.0;

/// Anything that can turn a scheduled step sequence into a runtime.
pub trait PerformanceModel {
    /// Account for one complete step; steps arrive in sequence order.
    fn update(&mut self, step: &Step, space: &DataSpace) -> Result<()>;

    /// Accumulated runtime in seconds
    fn runtime(&self) -> f64;
}

/// Cost of one step, taken from its slowest team.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepCost {
    pub index: usize,
    pub execution: f64,
    pub network: f64,
    pub total: f64,
}

#[derive(Clone, Debug)]
pub struct RooflineModel<'c> {
    cluster: &'c Cluster,
    overlap: f64,
    runtime: f64,
    state: DataflowState,
    costs: Vec<StepCost>,
}

fn link_cost(kbytes: f64, bandwidth: f64, latency: f64) -> f64 {
    latency / LATENCY_TO_SECONDS + kbytes / (bandwidth * BANDWIDTH_TO_SECONDS)
}

impl<'c> RooflineModel<'c> {
    pub fn new(cluster: &'c Cluster) -> Self {
        Self::with_overlap(cluster, ROOFLINE_OVERLAP)
    }

    pub fn with_overlap(cluster: &'c Cluster, overlap: f64) -> Self {
        RooflineModel {
            cluster,
            overlap,
            runtime: 0.0,
            state: DataflowState::new(),
            costs: Vec::new(),
        }
    }

    pub fn cluster(&self) -> &'c Cluster {
        self.cluster
    }

    pub fn state(&self) -> &DataflowState {
        &self.state
    }

    /// Per-step costs in update order
    pub fn costs(&self) -> &[StepCost] {
        &self.costs
    }

    pub fn costs_at(&self, index: usize) -> Option<&StepCost> {
        self.costs.iter().find(|c| c.index == index)
    }

    /// Compute time of `splits` on `team` in seconds.
    pub fn execution_costs(&self, step: &Step, splits: &[&PatternSplit], team: &Team) -> Result<f64> {
        let processor = self.cluster.processor(team.processor())?;
        let mut total = 0.0;
        for split in splits {
            if split.width() == 0 {
                continue;
            }
            let flops = split.flops(step.pattern(split.pattern())?)?;
            let cores = split.width().min(team.cores()).max(1);
            total += flops / cores as f64 / (processor.frequency * FREQUENCY_TO_SECONDS);
        }
        Ok(total)
    }

    /// Transfer time of every tile `splits` read, in seconds.
    pub fn network_costs(&self, splits: &[&PatternSplit], team: &Team, space: &DataSpace) -> Result<f64> {
        let mut tiles = BTreeSet::new();
        for split in splits {
            for view in split.consumes() {
                tiles.extend(space.basis_of(view)?);
            }
        }

        let mut initial_kbytes = 0.0;
        let mut transfers: BTreeMap<ProcessorId, f64> = BTreeMap::new();
        for tile in tiles {
            let kbytes = space.tile(tile)?.kbytes();
            let owners = self.state.owners(tile);
            let closest = self
                .cluster
                .closest(team.processor(), owners.iter().map(|t| t.processor()))?;
            match closest {
                Some(owner) => *transfers.entry(owner).or_insert(0.0) += kbytes,
                None => initial_kbytes += kbytes,
            }
        }

        let mut total = 0.0;
        if initial_kbytes > 0.0 {
            total += self.initial_cost(initial_kbytes, team)?;
        }
        for (owner, kbytes) in transfers {
            total += self.transfer_cost(owner, kbytes, team)?;
        }
        Ok(total)
    }

    /// Memory bandwidth available to `cores` cores of a device
    fn memory_bandwidth(cores: usize, bandwidth: f64, max_bandwidth: f64) -> f64 {
        (cores as f64 * bandwidth).min(max_bandwidth)
    }

    /// Data nobody holds yet: CPUs read their own memory, accelerators are
    /// fed over the node link from the host CPU.
    fn initial_cost(&self, kbytes: f64, team: &Team) -> Result<f64> {
        let processor = self.cluster.processor(team.processor())?;
        let device = self.cluster.device(processor.device)?;
        if device.device_type == DeviceType::Cpu {
            let bandwidth = Self::memory_bandwidth(
                team.cores(),
                device.memory_bandwidth,
                device.memory_max_bandwidth,
            );
            return Ok(link_cost(kbytes, bandwidth, device.memory_latency));
        }

        let node = self.cluster.node(device.node)?;
        let host = self.cluster.host_device(device.node).ok_or_else(|| {
            SimError::Topology(format!("node '{}' has no host CPU", node.identifier))
        })?;
        Ok(link_cost(
            kbytes,
            node.bandwidth(host, device.id)?,
            node.latency(host, device.id)?,
        ))
    }

    fn transfer_cost(&self, owner: ProcessorId, kbytes: f64, team: &Team) -> Result<f64> {
        let processor = self.cluster.processor(team.processor())?;
        let device = self.cluster.device(processor.device)?;
        let source = self.cluster.processor(owner)?;

        let cost = match self.cluster.distance(owner, team.processor())? {
            Distance::Processor => {
                let cache_bandwidth = team.cores() as f64 * processor.cache_bandwidth;
                let cached = kbytes.min(processor.cache_size * 1000.0);
                let spilled = kbytes - cached;
                let mut cost = link_cost(cached, cache_bandwidth, processor.cache_latency);
                if spilled > 0.0 {
                    let bandwidth = Self::memory_bandwidth(
                        team.cores(),
                        device.memory_bandwidth,
                        device.memory_max_bandwidth,
                    );
                    cost = cost.max(link_cost(spilled, bandwidth, device.memory_latency));
                }
                cost
            }
            Distance::Device => {
                let bandwidth = Self::memory_bandwidth(
                    team.cores(),
                    device.memory_bandwidth,
                    device.memory_max_bandwidth,
                );
                link_cost(kbytes, bandwidth, device.memory_latency)
            }
            Distance::Node => {
                let node = self.cluster.node(device.node)?;
                link_cost(
                    kbytes,
                    node.bandwidth(source.device, device.id)?,
                    node.latency(source.device, device.id)?,
                )
            }
            Distance::Cluster => link_cost(
                kbytes,
                self.cluster.bandwidth(source.node, device.node)?,
                self.cluster.latency(source.node, device.node)?,
            ),
        };
        Ok(cost)
    }
}

impl PerformanceModel for RooflineModel<'_> {
    fn update(&mut self, step: &Step, space: &DataSpace) -> Result<()> {
        if !step.complete() {
            return Err(SimError::IncompleteStep {
                index: step.index(),
                assigned: step.assigned_count(),
                splits: step.splits().len(),
            });
        }

        let mut worst = StepCost {
            index: step.index(),
            execution: 0.0,
            network: 0.0,
            total: 0.0,
        };
        for team in step.teams() {
            let splits = step.assigned(team.id());
            let execution = self.execution_costs(step, &splits, team)?;
            let network = self.network_costs(&splits, team, space)?;
            let hidden = if execution > 0.0 {
                (network / execution).min(self.overlap)
            } else {
                0.0
            };
            let total = (1.0 - hidden) * execution + network;
            debug!(
                "Step {} team {:?}: execution {:.3e}s, network {:.3e}s",
                step.index(),
                team.id(),
                execution,
                network
            );
            // ties keep the team assigned first
            if total > worst.total {
                worst = StepCost {
                    index: step.index(),
                    execution,
                    network,
                    total,
                };
            }
        }

        self.runtime += worst.total;
        self.costs.push(worst);
        self.state.update(step, space)?;
        Ok(())
    }

    fn runtime(&self) -> f64 {
        self.runtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apt::{Apt, AptBuilder};
    use crate::cluster::fixtures::c18g;
    use crate::data::ElementKind;
    use crate::pattern::functors::{ConstantCost, TriangleCost};
    use approx::assert_relative_eq;

    fn processor(cluster: &Cluster, node: &str, device: &str, id: &str) -> ProcessorId {
        cluster.find_processor(node, device, id).unwrap()
    }

    /// Two maps over the same 100-element block: step 1 reads what step 0 wrote.
    fn chained() -> Apt {
        let mut builder = AptBuilder::default();
        let a = builder.data("a", ElementKind::F64, &[100]).unwrap();
        builder.map(ConstantCost, &a).unwrap();
        builder.map(ConstantCost, &a).unwrap();
        builder.compile().unwrap()
    }

    fn assign_all(apt: &mut Apt, index: usize, team: &Team) {
        let step = apt.step_mut(index).unwrap();
        let ids: Vec<_> = step.patterns().iter().map(|p| p.id()).collect();
        for id in ids {
            step.assign_pattern(id, team).unwrap();
        }
    }

    /// Network cost of step 1 for `reader` after step 0 ran on socket 1 of Node1.
    fn warm_read_cost(cluster: &Cluster, reader: &Team) -> f64 {
        let mut apt = chained();
        let writer = Team::new(processor(cluster, "Node1", "CPU1", "1"), 1);
        assign_all(&mut apt, 0, &writer);
        assign_all(&mut apt, 1, reader);

        let mut model = RooflineModel::new(cluster);
        model.update(apt.step(0).unwrap(), apt.space()).unwrap();
        let step = apt.step(1).unwrap();
        model
            .network_costs(&step.assigned(reader.id()), reader, apt.space())
            .unwrap()
    }

    #[test]
    fn test_execution_constant() {
        let cluster = c18g();
        let team = Team::new(processor(&cluster, "Node1", "CPU1", "1"), 24);
        let mut apt = chained();
        assign_all(&mut apt, 0, &team);

        let model = RooflineModel::new(&cluster);
        let step = apt.step(0).unwrap();
        let costs = model
            .execution_costs(step, &step.assigned(team.id()), &team)
            .unwrap();
        assert_relative_eq!(costs, 100.0 / 24.0 / (2100.0 * 1e6), max_relative = 1e-9);
    }

    #[test]
    fn test_execution_triangle() {
        let cluster = c18g();
        let team = Team::new(processor(&cluster, "Node1", "CPU1", "1"), 1);
        let mut builder = AptBuilder::default();
        let m = builder.data("m", ElementKind::F64, &[100, 2]).unwrap();
        builder.map(TriangleCost, &m).unwrap();
        let mut apt = builder.compile().unwrap();
        assign_all(&mut apt, 0, &team);

        let model = RooflineModel::new(&cluster);
        let step = apt.step(0).unwrap();
        let costs = model
            .execution_costs(step, &step.assigned(team.id()), &team)
            .unwrap();
        assert_relative_eq!(costs, (2.0 + 200.0) * 50.0 / (2100.0 * 1e6), max_relative = 1e-9);
    }

    #[test]
    fn test_network_initial() {
        let cluster = c18g();
        let team = Team::new(processor(&cluster, "Node1", "CPU1", "1"), 1);
        let mut apt = chained();
        assign_all(&mut apt, 0, &team);

        let model = RooflineModel::new(&cluster);
        let step = apt.step(0).unwrap();
        let costs = model
            .network_costs(&step.assigned(team.id()), &team, apt.space())
            .unwrap();
        assert_relative_eq!(costs, 42.38 / 1e9 + 0.8 / (21330.0 * 1e3), max_relative = 1e-9);
    }

    #[test]
    fn test_network_initial_on_accelerator() {
        let cluster = c18g();
        let team = Team::new(processor(&cluster, "Node1", "GPU1", "1"), 80);
        let mut apt = chained();
        assign_all(&mut apt, 0, &team);

        let model = RooflineModel::new(&cluster);
        let step = apt.step(0).unwrap();
        let costs = model
            .network_costs(&step.assigned(team.id()), &team, apt.space())
            .unwrap();
        assert_relative_eq!(costs, 7210.0 / 1e9 + 0.8 / (12152.0 * 1e3), max_relative = 1e-9);
    }

    #[test]
    fn test_network_cache() {
        let cluster = c18g();
        let reader = Team::new(processor(&cluster, "Node1", "CPU1", "1"), 1);
        assert_relative_eq!(
            warm_read_cost(&cluster, &reader),
            20.95 / 1e9 + 0.8 / (38000.0 * 1e3),
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_network_main_memory() {
        let cluster = c18g();
        let reader = Team::new(processor(&cluster, "Node1", "CPU1", "2"), 1);
        assert_relative_eq!(
            warm_read_cost(&cluster, &reader),
            42.38 / 1e9 + 0.8 / (21330.0 * 1e3),
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_network_node_link() {
        let cluster = c18g();
        let reader = Team::new(processor(&cluster, "Node1", "GPU2", "1"), 80);
        assert_relative_eq!(
            warm_read_cost(&cluster, &reader),
            7210.0 / 1e9 + 0.8 / (12152.0 * 1e3),
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_network_cluster_link() {
        let cluster = c18g();
        let reader = Team::new(processor(&cluster, "Node2", "CPU1", "1"), 1);
        assert_relative_eq!(
            warm_read_cost(&cluster, &reader),
            1840.0 / 1e9 + 0.8 / (4148.0 * 1e3),
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_update_accumulates_runtime() {
        let cluster = c18g();
        let team = Team::new(processor(&cluster, "Node1", "CPU1", "1"), 1);
        let mut apt = chained();
        assign_all(&mut apt, 0, &team);
        assign_all(&mut apt, 1, &team);

        let mut model = RooflineModel::new(&cluster);
        let runtime = apt.evaluate(&mut model).unwrap();

        let execution = 100.0 / (2100.0 * 1e6);
        let cold = 42.38 / 1e9 + 0.8 / (21330.0 * 1e3);
        let warm = 20.95 / 1e9 + 0.8 / (38000.0 * 1e3);
        assert_relative_eq!(runtime, 2.0 * execution + cold + warm, max_relative = 1e-9);
        assert_eq!(model.costs().len(), 2);
        assert_relative_eq!(model.costs_at(1).unwrap().network, warm, max_relative = 1e-9);
        assert_eq!(model.state().index(), 2);
    }

    #[test]
    fn test_overlap_hides_transfers() {
        let cluster = c18g();
        let team = Team::new(processor(&cluster, "Node1", "CPU1", "1"), 1);
        let mut apt = chained();
        assign_all(&mut apt, 0, &team);

        let mut serial = RooflineModel::new(&cluster);
        let mut overlapped = RooflineModel::with_overlap(&cluster, 1.0);
        serial.update(apt.step(0).unwrap(), apt.space()).unwrap();
        overlapped.update(apt.step(0).unwrap(), apt.space()).unwrap();
        assert!(overlapped.runtime() < serial.runtime());
    }

    #[test]
    fn test_update_rejects_incomplete_step() {
        let cluster = c18g();
        let apt = chained();
        let mut model = RooflineModel::new(&cluster);
        assert!(matches!(
            model.update(apt.step(0).unwrap(), apt.space()),
            Err(SimError::IncompleteStep { .. })
        ));
    }
}

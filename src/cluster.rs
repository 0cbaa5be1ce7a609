//! Static hardware topology: Processor → Device → Node → Cluster
//!
//! A [`Cluster`] is an immutable arena built once from a [`ClusterSpec`]
//! (either written in code or produced by [`crate::topology`] from JSON
//! documents). Every level is addressed through a copyable handle
//! ([`ProcessorId`], [`DeviceId`], [`NodeId`]) instead of parent pointers.
//!
//! # Units
//!
//! - frequency: MHz
//! - cache/memory size: KB
//! - latency: ns
//! - bandwidth: MB/s
//!
//! The cost model converts with the constants in [`crate::roofline`].

use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Handles
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProcessorId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

/// How far apart two processors sit in the hierarchy.
///
/// Ordered from closest to farthest, so `min()` over a set of distances
/// picks the cheapest transfer path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Distance {
    Processor,
    Device,
    Node,
    Cluster,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    #[serde(rename = "CPU")]
    Cpu,
    #[serde(rename = "GPU")]
    Gpu,
}

// ============================================================================
// Construction specs
// ============================================================================

/// One processor (socket, SM group, ...) with its highest-level cache
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessorSpec {
    pub identifier: String,
    pub cores: usize,
    pub arithmetic_units: usize,
    /// Clock frequency in MHz
    pub frequency: f64,
    /// Cache size in KB
    pub cache_size: f64,
    /// Cache latency in ns
    pub cache_latency: f64,
    /// Cache bandwidth per core in MB/s
    pub cache_bandwidth: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceSpec {
    pub identifier: String,
    pub device_type: DeviceType,
    /// Memory size in KB
    pub memory_size: f64,
    /// Memory latency in ns
    pub memory_latency: f64,
    /// Memory bandwidth per core in MB/s
    pub memory_bandwidth: f64,
    /// Saturation bandwidth of the memory in MB/s
    pub memory_max_bandwidth: f64,
    pub processors: Vec<ProcessorSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeSpec {
    pub identifier: String,
    pub address: Option<String>,
    pub node_type: String,
    pub devices: Vec<DeviceSpec>,
    /// Device-to-device bandwidth in MB/s, in `devices` order
    pub bandwidth: Vec<Vec<f64>>,
    /// Device-to-device latency in ns, in `devices` order
    pub latency: Vec<Vec<f64>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClusterSpec {
    pub topology: String,
    pub nodes: Vec<NodeSpec>,
    /// Node-to-node bandwidth in MB/s, in `nodes` order
    pub bandwidth: Vec<Vec<f64>>,
    /// Node-to-node latency in ns, in `nodes` order
    pub latency: Vec<Vec<f64>>,
}

// ============================================================================
// Arena entries
// ============================================================================

#[derive(Clone, Debug)]
pub struct Processor {
    pub id: ProcessorId,
    pub identifier: String,
    pub device: DeviceId,
    pub node: NodeId,
    pub cores: usize,
    pub arithmetic_units: usize,
    pub frequency: f64,
    pub cache_size: f64,
    pub cache_latency: f64,
    pub cache_bandwidth: f64,
}

#[derive(Clone, Debug)]
pub struct Device {
    pub id: DeviceId,
    pub identifier: String,
    pub node: NodeId,
    pub device_type: DeviceType,
    pub memory_size: f64,
    pub memory_latency: f64,
    pub memory_bandwidth: f64,
    pub memory_max_bandwidth: f64,
    pub processors: Vec<ProcessorId>,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub identifier: String,
    pub address: Option<String>,
    pub node_type: String,
    pub devices: Vec<DeviceId>,
    bandwidth: Vec<Vec<f64>>,
    latency: Vec<Vec<f64>>,
}

impl Node {
    fn position(&self, device: DeviceId) -> Result<usize> {
        self.devices
            .iter()
            .position(|d| *d == device)
            .ok_or_else(|| {
                SimError::Topology(format!(
                    "device {:?} is not part of node '{}'",
                    device, self.identifier
                ))
            })
    }

    /// Link bandwidth between two devices of this node (MB/s)
    pub fn bandwidth(&self, from: DeviceId, to: DeviceId) -> Result<f64> {
        Ok(self.bandwidth[self.position(from)?][self.position(to)?])
    }

    /// Link latency between two devices of this node (ns)
    pub fn latency(&self, from: DeviceId, to: DeviceId) -> Result<f64> {
        Ok(self.latency[self.position(from)?][self.position(to)?])
    }
}

/// Immutable topology arena.
#[derive(Clone, Debug)]
pub struct Cluster {
    pub topology: String,
    processors: Vec<Processor>,
    devices: Vec<Device>,
    nodes: Vec<Node>,
    bandwidth: Vec<Vec<f64>>,
    latency: Vec<Vec<f64>>,
}

fn check_square(matrix: &[Vec<f64>], n: usize, what: &str, owner: &str) -> Result<()> {
    if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
        return Err(SimError::Topology(format!(
            "{} matrix of '{}' must be {}x{}",
            what, owner, n, n
        )));
    }
    Ok(())
}

impl Cluster {
    /// Flatten a hierarchical spec into the arena, validating every
    /// connectivity matrix against the number of children it connects.
    pub fn from_spec(spec: ClusterSpec) -> Result<Self> {
        let n = spec.nodes.len();
        check_square(&spec.bandwidth, n, "bandwidth", "cluster")?;
        check_square(&spec.latency, n, "latency", "cluster")?;

        let mut processors = Vec::new();
        let mut devices = Vec::new();
        let mut nodes = Vec::with_capacity(n);

        for node_spec in spec.nodes {
            let node_id = NodeId(nodes.len());
            let m = node_spec.devices.len();
            check_square(&node_spec.bandwidth, m, "bandwidth", &node_spec.identifier)?;
            check_square(&node_spec.latency, m, "latency", &node_spec.identifier)?;

            let mut device_ids = Vec::with_capacity(m);
            for device_spec in node_spec.devices {
                let device_id = DeviceId(devices.len());
                let mut processor_ids = Vec::with_capacity(device_spec.processors.len());
                for p in device_spec.processors {
                    let processor_id = ProcessorId(processors.len());
                    processors.push(Processor {
                        id: processor_id,
                        identifier: p.identifier,
                        device: device_id,
                        node: node_id,
                        cores: p.cores,
                        arithmetic_units: p.arithmetic_units,
                        frequency: p.frequency,
                        cache_size: p.cache_size,
                        cache_latency: p.cache_latency,
                        cache_bandwidth: p.cache_bandwidth,
                    });
                    processor_ids.push(processor_id);
                }
                devices.push(Device {
                    id: device_id,
                    identifier: device_spec.identifier,
                    node: node_id,
                    device_type: device_spec.device_type,
                    memory_size: device_spec.memory_size,
                    memory_latency: device_spec.memory_latency,
                    memory_bandwidth: device_spec.memory_bandwidth,
                    memory_max_bandwidth: device_spec.memory_max_bandwidth,
                    processors: processor_ids,
                });
                device_ids.push(device_id);
            }

            nodes.push(Node {
                id: node_id,
                identifier: node_spec.identifier,
                address: node_spec.address,
                node_type: node_spec.node_type,
                devices: device_ids,
                bandwidth: node_spec.bandwidth,
                latency: node_spec.latency,
            });
        }

        Ok(Cluster {
            topology: spec.topology,
            processors,
            devices,
            nodes,
            bandwidth: spec.bandwidth,
            latency: spec.latency,
        })
    }

    pub fn processors(&self) -> &[Processor] {
        &self.processors
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn processor(&self, id: ProcessorId) -> Result<&Processor> {
        self.processors
            .get(id.0)
            .ok_or_else(|| SimError::Topology(format!("unknown processor {:?}", id)))
    }

    pub fn device(&self, id: DeviceId) -> Result<&Device> {
        self.devices
            .get(id.0)
            .ok_or_else(|| SimError::Topology(format!("unknown device {:?}", id)))
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| SimError::Topology(format!("unknown node {:?}", id)))
    }

    /// Link bandwidth between two nodes (MB/s)
    pub fn bandwidth(&self, from: NodeId, to: NodeId) -> Result<f64> {
        self.node(from)?;
        self.node(to)?;
        Ok(self.bandwidth[from.0][to.0])
    }

    /// Link latency between two nodes (ns)
    pub fn latency(&self, from: NodeId, to: NodeId) -> Result<f64> {
        self.node(from)?;
        self.node(to)?;
        Ok(self.latency[from.0][to.0])
    }

    /// First CPU device of a node; cold data on accelerators is staged from it.
    pub fn host_device(&self, node: NodeId) -> Option<DeviceId> {
        let node = self.nodes.get(node.0)?;
        node.devices
            .iter()
            .copied()
            .find(|d| self.devices[d.0].device_type == DeviceType::Cpu)
    }

    /// Resolve a processor by the identifiers of its node, device and itself.
    pub fn find_processor(&self, node: &str, device: &str, processor: &str) -> Option<ProcessorId> {
        let node = self.nodes.iter().find(|n| n.identifier == node)?;
        let device = node
            .devices
            .iter()
            .map(|d| &self.devices[d.0])
            .find(|d| d.identifier == device)?;
        device
            .processors
            .iter()
            .copied()
            .find(|p| self.processors[p.0].identifier == processor)
    }

    pub fn distance(&self, a: ProcessorId, b: ProcessorId) -> Result<Distance> {
        if a == b {
            return Ok(Distance::Processor);
        }
        let (pa, pb) = (self.processor(a)?, self.processor(b)?);
        if pa.device == pb.device {
            Ok(Distance::Device)
        } else if pa.node == pb.node {
            Ok(Distance::Node)
        } else {
            Ok(Distance::Cluster)
        }
    }

    /// The candidate nearest to `target`; ties keep the first candidate seen.
    pub fn closest<I>(&self, target: ProcessorId, candidates: I) -> Result<Option<ProcessorId>>
    where
        I: IntoIterator<Item = ProcessorId>,
    {
        let mut best: Option<(Distance, ProcessorId)> = None;
        for candidate in candidates {
            let distance = self.distance(target, candidate)?;
            if distance == Distance::Processor {
                return Ok(Some(candidate));
            }
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, candidate));
            }
        }
        Ok(best.map(|(_, p)| p))
    }
}

// ============================================================================
// Teams
// ============================================================================

static NEXT_TEAM_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TeamId(pub usize);

/// A number of cores on one processor; the unit a split is assigned to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Team {
    id: TeamId,
    identifier: Option<String>,
    processor: ProcessorId,
    cores: usize,
}

impl Team {
    pub fn new(processor: ProcessorId, cores: usize) -> Self {
        Team {
            id: TeamId(NEXT_TEAM_ID.fetch_add(1, Ordering::Relaxed)),
            identifier: None,
            processor,
            cores,
        }
    }

    pub fn named(identifier: &str, processor: ProcessorId, cores: usize) -> Self {
        Team {
            identifier: Some(identifier.to_string()),
            ..Self::new(processor, cores)
        }
    }

    pub fn id(&self) -> TeamId {
        self.id
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn processor(&self) -> ProcessorId {
        self.processor
    }

    pub fn cores(&self) -> usize {
        self.cores
    }
}

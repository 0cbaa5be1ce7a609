//! Loading a [`Cluster`] from hierarchical JSON documents
//!
//! Each level names its children through `template` paths which are resolved
//! relative to the directory of the referencing document:
//!
//! ```text
//! cluster.json ──nodes──▶ node.json ──devices──▶ device.json ──cache-group──▶ processor.json
//! ```
//!
//! Connectivity matrices are indexed in declaration order of the children.

use crate::cluster::{Cluster, ClusterSpec, DeviceSpec, DeviceType, NodeSpec, ProcessorSpec};
use crate::error::{Result, SimError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// Document formats
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheDocument {
    pub size: f64,
    pub latency: f64,
    pub bandwidth: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProcessorDocument {
    pub cores: usize,
    pub arithmetic_units: usize,
    pub frequency: f64,
    /// Cache levels from closest to farthest; the last one is modelled
    pub caches: Vec<CacheDocument>,
}

/// Reference to a child document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRef {
    pub identifier: String,
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceDocument {
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub size: f64,
    pub latency: f64,
    pub bandwidth: f64,
    pub max_bandwidth: f64,
    pub cache_group: Vec<TemplateRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeDocument {
    #[serde(rename = "type")]
    pub node_type: String,
    pub devices: Vec<TemplateRef>,
    pub connectivity_bandwidth: Vec<Vec<f64>>,
    pub connectivity_latency: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterDocument {
    pub topology: String,
    pub nodes: Vec<TemplateRef>,
    pub connectivity_bandwidth: Vec<Vec<f64>>,
    pub connectivity_latency: Vec<Vec<f64>>,
}

// ============================================================================
// Loaders
// ============================================================================

fn read_document<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    debug!("Loading topology document {}", path.display());
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn resolve(parent: &Path, template: &str) -> PathBuf {
    match parent.parent() {
        Some(dir) => dir.join(template),
        None => PathBuf::from(template),
    }
}

/// Load a processor template and give it an identifier.
pub fn load_processor(path: &Path, identifier: &str) -> Result<ProcessorSpec> {
    let doc: ProcessorDocument = read_document(path)?;
    let cache = doc.caches.last().ok_or_else(|| {
        SimError::Topology(format!("processor template {} lists no caches", path.display()))
    })?;
    Ok(ProcessorSpec {
        identifier: identifier.to_string(),
        cores: doc.cores,
        arithmetic_units: doc.arithmetic_units,
        frequency: doc.frequency,
        cache_size: cache.size,
        cache_latency: cache.latency,
        cache_bandwidth: cache.bandwidth,
    })
}

pub fn load_device(path: &Path, identifier: &str) -> Result<DeviceSpec> {
    let doc: DeviceDocument = read_document(path)?;
    let processors = doc
        .cache_group
        .iter()
        .map(|p| load_processor(&resolve(path, &p.template), &p.identifier))
        .collect::<Result<Vec<_>>>()?;
    Ok(DeviceSpec {
        identifier: identifier.to_string(),
        device_type: doc.device_type,
        memory_size: doc.size,
        memory_latency: doc.latency,
        memory_bandwidth: doc.bandwidth,
        memory_max_bandwidth: doc.max_bandwidth,
        processors,
    })
}

pub fn load_node(path: &Path, identifier: &str, address: Option<String>) -> Result<NodeSpec> {
    let doc: NodeDocument = read_document(path)?;
    let devices = doc
        .devices
        .iter()
        .map(|d| load_device(&resolve(path, &d.template), &d.identifier))
        .collect::<Result<Vec<_>>>()?;
    Ok(NodeSpec {
        identifier: identifier.to_string(),
        address,
        node_type: doc.node_type,
        devices,
        bandwidth: doc.connectivity_bandwidth,
        latency: doc.connectivity_latency,
    })
}

/// Load a full cluster description and build the topology arena.
///
/// # Errors
/// Returns `SimError::Io` if any referenced document cannot be read,
/// `SimError::Json` if a document is malformed and `SimError::Topology`
/// if a connectivity matrix does not match its children.
pub fn load_cluster<P: AsRef<Path>>(path: P) -> Result<Cluster> {
    let path = path.as_ref();
    let doc: ClusterDocument = read_document(path)?;
    let nodes = doc
        .nodes
        .iter()
        .map(|n| load_node(&resolve(path, &n.template), &n.identifier, n.address.clone()))
        .collect::<Result<Vec<_>>>()?;
    let cluster = Cluster::from_spec(ClusterSpec {
        topology: doc.topology,
        nodes,
        bandwidth: doc.connectivity_bandwidth,
        latency: doc.connectivity_latency,
    })?;
    debug!(
        "Loaded cluster: {} nodes, {} devices, {} processors",
        cluster.nodes().len(),
        cluster.devices().len(),
        cluster.processors().len()
    );
    Ok(cluster)
}

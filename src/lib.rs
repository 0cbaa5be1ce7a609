//! PatternSim: offline performance prediction for index-parallel workloads
//!
//! This library estimates how long a sequence of map operations takes on a
//! hierarchical cluster, without running it:
//! 1. Declare tiled data blocks and map operations on an [`AptBuilder`]
//! 2. Group independent maps into steps (synchronization efficiency)
//! 3. Split and assign every step to teams of cores ([`Optimizer`])
//! 4. Replay the schedule through a roofline cost model ([`RooflineModel`])
//!
//! # Core Pipeline Flow
//! ```text
//! data + maps → AptBuilder → Apt (steps) → Optimizer → RooflineModel → runtime
//!                  ↓                           ↓             ↓
//!            fuse-or-append            split / assign   DataflowState
//!            (happens_before)          (teams)          (tile owners)
//! ```
//!
//! # Module Organization
//!
//! ## Topology
//! - [`cluster`]: Processor → Device → Node → Cluster arena, distances, teams
//! - [`topology`]: JSON template loading
//!
//! ## Dependency Substrate
//! - [`data`]: Data blocks, basis tiles, disjointness
//! - [`view`]: Rectangular sub-ranges
//!
//! ## Operations and Scheduling
//! - [`pattern`]: Map operations with sampled and interpolated costs
//! - [`split`]: Partitions of a pattern's index domain
//! - [`step`]: Groups of independent patterns, split/assign bookkeeping
//! - [`apt`]: Build context (fusion heuristic) and compiled sequence
//! - [`optimizer`]: Scheduling policies
//!
//! ## Cost Model
//! - [`dataflow`]: Tile ownership replay
//! - [`roofline`]: Execution and transfer estimates
//!
//! ## Supporting Modules
//! - [`config`]: Settings (JSON)
//! - [`backend`]: Buffer materialization hook
//! - [`report`]: Serializable schedule summaries
//! - [`workloads`]: Sample workloads used by the CLI

// ============================================================================
// Topology
// ============================================================================

pub mod cluster;
pub mod topology;

// ============================================================================
// Dependency Substrate
// ============================================================================

pub mod data;
pub mod view;

// ============================================================================
// Operations and Scheduling
// ============================================================================

pub mod apt;
pub mod optimizer;
pub mod pattern;
pub mod split;
pub mod step;

// ============================================================================
// Cost Model
// ============================================================================

pub mod dataflow;
pub mod roofline;

// ============================================================================
// Supporting Modules
// ============================================================================

pub mod backend;
pub mod config;
pub mod error;
pub mod report;
pub mod workloads;

// Re-export commonly used types
pub use apt::{Apt, AptBuilder};
pub use backend::{ExecutionBackend, SymbolicBackend};
pub use cluster::{Cluster, Distance, ProcessorId, Team};
pub use config::SimConfig;
pub use data::{DataSpace, ElementKind};
pub use dataflow::DataflowState;
pub use error::{Result, SimError};
pub use optimizer::{GreedyDeviceOptimizer, Optimizer};
pub use pattern::{Element, MapFunctor, PatternIndexInfo};
pub use report::AptReport;
pub use roofline::{PerformanceModel, RooflineModel};
pub use step::Step;
pub use view::View;

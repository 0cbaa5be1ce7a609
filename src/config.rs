//! Simulation settings

use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Knobs of the step builder and the cost model.
///
/// Every field has a default, so a JSON file only needs to list what it
/// changes:
///
/// ```json
/// { "synchronization-efficiency-length": 4, "data-interpolation-frequency": 16 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SimConfig {
    /// Number of cost samples taken per pattern
    pub operation_interpolation_frequency: usize,

    /// Tiling frequency used when declaring data
    pub data_interpolation_frequency: usize,

    /// Fuse independent patterns into earlier steps
    pub synchronization_efficiency: bool,

    /// How many steps fusion may look back (`None` = unbounded)
    pub synchronization_efficiency_length: Option<usize>,

    /// Fraction of the transfer time that may hide behind computation
    pub overlap: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            operation_interpolation_frequency: 2,
            data_interpolation_frequency: 32,
            synchronization_efficiency: true,
            synchronization_efficiency_length: None,
            overlap: crate::roofline::ROOFLINE_OVERLAP,
        }
    }
}

impl SimConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| SimError::InvalidShape {
            identifier: "config".to_string(),
            reason: reason.to_string(),
        };
        if self.operation_interpolation_frequency == 0 {
            return Err(invalid("operation-interpolation-frequency must be at least 1"));
        }
        if self.data_interpolation_frequency == 0 {
            return Err(invalid("data-interpolation-frequency must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.overlap) {
            return Err(invalid("overlap must lie in [0, 1]"));
        }
        Ok(())
    }
}

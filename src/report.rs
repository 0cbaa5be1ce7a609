//! Serializable summaries of a compiled and scheduled sequence

use crate::apt::Apt;
use crate::cluster::{Cluster, ProcessorId};
use crate::data::ElementKind;
use crate::error::Result;
use crate::roofline::StepCost;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessorSummary {
    pub node: String,
    pub device: String,
    pub processor: String,
    pub cores: usize,
    pub frequency: f64,
}

impl ProcessorSummary {
    pub fn of(cluster: &Cluster, id: ProcessorId) -> Result<Self> {
        let processor = cluster.processor(id)?;
        let device = cluster.device(processor.device)?;
        let node = cluster.node(processor.node)?;
        Ok(ProcessorSummary {
            node: node.identifier.clone(),
            device: device.identifier.clone(),
            processor: processor.identifier.clone(),
            cores: processor.cores,
            frequency: processor.frequency,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitReport {
    pub pattern: String,
    pub begin: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    /// Cores of the assigned team
    pub cores: usize,
    pub processor: ProcessorSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    /// Number of patterns in the step
    pub width: usize,
    pub complete: bool,
    /// Present only once every split is assigned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub splits: Option<Vec<SplitReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<StepCost>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataReport {
    pub identifier: String,
    pub kind: ElementKind,
    pub shape: Vec<usize>,
    pub tiles: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AptReport {
    pub data: Vec<DataReport>,
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<f64>,
}

impl AptReport {
    pub fn build(apt: &Apt, cluster: &Cluster) -> Result<Self> {
        let data = apt
            .space()
            .blocks()
            .iter()
            .map(|d| DataReport {
                identifier: d.identifier().to_string(),
                kind: d.kind(),
                shape: d.shape().to_vec(),
                tiles: d.basis().len(),
            })
            .collect();

        let mut steps = Vec::with_capacity(apt.len());
        for step in apt.steps() {
            let splits = if step.complete() {
                let mut splits = Vec::with_capacity(step.splits().len());
                for split in step.splits() {
                    let pattern = step.pattern(split.pattern())?;
                    // complete() guarantees an assignment
                    if let Some(team) = step.assignment(split.id()) {
                        splits.push(SplitReport {
                            pattern: pattern.identifier().to_string(),
                            begin: split.begin(),
                            end: split.end(),
                            team: team.identifier().map(str::to_string),
                            cores: team.cores(),
                            processor: ProcessorSummary::of(cluster, team.processor())?,
                        });
                    }
                }
                Some(splits)
            } else {
                None
            };
            steps.push(StepReport {
                index: step.index(),
                width: step.len(),
                complete: step.complete(),
                splits,
                cost: None,
            });
        }

        Ok(AptReport {
            data,
            steps,
            runtime: None,
        })
    }

    /// Attach per-step costs and the total runtime of an evaluation.
    pub fn with_costs(mut self, costs: &[StepCost], runtime: f64) -> Self {
        for step in &mut self.steps {
            step.cost = costs.iter().find(|c| c.index == step.index).cloned();
        }
        self.runtime = Some(runtime);
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apt::AptBuilder;
    use crate::cluster::fixtures::c18g;
    use crate::cluster::Team;
    use crate::optimizer::GreedyDeviceOptimizer;
    use crate::pattern::functors::ConstantCost;
    use crate::roofline::{PerformanceModel, RooflineModel};

    #[test]
    fn test_incomplete_steps_omit_splits() {
        let cluster = c18g();
        let mut builder = AptBuilder::default();
        let a = builder.data("a", ElementKind::F64, &[64]).unwrap();
        builder.map(ConstantCost, &a).unwrap();
        let apt = builder.compile().unwrap();

        let report = apt.report(&cluster).unwrap();
        assert_eq!(report.data[0].tiles, 2);
        assert!(!report.steps[0].complete);
        assert!(report.steps[0].splits.is_none());

        let json = report.to_json().unwrap();
        assert!(!json.contains("\"splits\""));
        assert!(!json.contains("\"team\""));
        assert!(json.contains("\"kind\": \"F64\""));
    }

    #[test]
    fn test_complete_steps_list_assignments() {
        let cluster = c18g();
        let mut builder = AptBuilder::default();
        let a = builder.data("a", ElementKind::F64, &[64]).unwrap();
        builder.map_named("scale", ConstantCost, &a).unwrap();
        let mut apt = builder.compile().unwrap();

        let team = Team::named("half-sm", cluster.find_processor("Node2", "GPU1", "1").unwrap(), 40);
        let step = apt.step_mut(0).unwrap();
        let id = step.patterns()[0].id();
        step.assign_pattern(id, &team).unwrap();

        let report = apt.report(&cluster).unwrap();
        let splits = report.steps[0].splits.as_ref().unwrap();
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].pattern, "scale");
        assert_eq!((splits[0].begin, splits[0].end), (0, 64));
        assert_eq!(splits[0].cores, 40);
        assert_eq!(splits[0].team.as_deref(), Some("half-sm"));
        assert_eq!(splits[0].processor.node, "Node2");
        assert_eq!(splits[0].processor.device, "GPU1");
    }

    #[test]
    fn test_costs_attach_per_step() {
        let cluster = c18g();
        let mut builder = AptBuilder::default();
        let a = builder.data("a", ElementKind::F64, &[64]).unwrap();
        builder.map(ConstantCost, &a).unwrap();
        builder.map(ConstantCost, &a).unwrap();
        let mut apt = builder.compile().unwrap();
        apt.optimize(&mut GreedyDeviceOptimizer::new(&cluster)).unwrap();

        let mut model = RooflineModel::new(&cluster);
        let runtime = apt.evaluate(&mut model).unwrap();
        let report = apt
            .report(&cluster)
            .unwrap()
            .with_costs(model.costs(), model.runtime());
        assert_eq!(report.runtime, Some(runtime));
        assert!(report.steps.iter().all(|s| s.cost.is_some()));
    }
}

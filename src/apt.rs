//! Build context and compiled step sequence
//!
//! [`AptBuilder`] is the caller-owned context in which data blocks are
//! declared and maps are added. Each map is placed by the synchronization
//! efficiency heuristic: it is fused into the earliest step it does not
//! depend on, within a bounded lookback, or appended as a new step.
//! [`AptBuilder::compile`] freezes the sequence into an [`Apt`], which is then
//! scheduled by an [`Optimizer`] and costed by a [`PerformanceModel`].

use crate::backend::{ExecutionBackend, SymbolicBackend};
use crate::cluster::Cluster;
use crate::config::SimConfig;
use crate::data::{DataSpace, ElementKind};
use crate::error::{Result, SimError};
use crate::optimizer::Optimizer;
use crate::pattern::{MapFunctor, Pattern, PatternId};
use crate::report::AptReport;
use crate::roofline::PerformanceModel;
use crate::step::Step;
use crate::view::View;
use log::{debug, info, warn};

pub struct AptBuilder {
    config: SimConfig,
    space: DataSpace,
    steps: Vec<Step>,
    next_pattern: usize,
}

impl Default for AptBuilder {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl AptBuilder {
    pub fn new(config: SimConfig) -> Self {
        AptBuilder {
            config,
            space: DataSpace::new(),
            steps: Vec::new(),
            next_pattern: 0,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Toggle fusion for the maps added from now on.
    pub fn set_synchronization_efficiency(&mut self, enabled: bool) {
        self.config.synchronization_efficiency = enabled;
    }

    /// Bound the fusion lookback for the maps added from now on.
    pub fn set_synchronization_efficiency_length(&mut self, length: Option<usize>) {
        self.config.synchronization_efficiency_length = length;
    }

    /// Cost samples taken by the maps added from now on.
    pub fn set_operation_interpolation_frequency(&mut self, frequency: usize) {
        self.config.operation_interpolation_frequency = frequency;
    }

    /// Tiling frequency of the data declared from now on.
    pub fn set_data_interpolation_frequency(&mut self, frequency: usize) {
        self.config.data_interpolation_frequency = frequency;
    }

    pub fn space(&self) -> &DataSpace {
        &self.space
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Declare a data block tiled with the configured data frequency.
    pub fn data(&mut self, identifier: &str, kind: ElementKind, shape: &[usize]) -> Result<View> {
        let frequency = self.config.data_interpolation_frequency;
        self.data_with_frequency(identifier, kind, shape, frequency)
    }

    pub fn data_with_frequency(
        &mut self,
        identifier: &str,
        kind: ElementKind,
        shape: &[usize],
        frequency: usize,
    ) -> Result<View> {
        self.space.declare(identifier, kind, shape, frequency)
    }

    /// Add a map writing `field`; it is named `map-<n>`.
    pub fn map<F: MapFunctor + 'static>(&mut self, functor: F, field: &View) -> Result<PatternId> {
        let identifier = format!("map-{}", self.next_pattern);
        self.map_named(&identifier, functor, field)
    }

    pub fn map_named<F: MapFunctor + 'static>(
        &mut self,
        identifier: &str,
        functor: F,
        field: &View,
    ) -> Result<PatternId> {
        let frequency = self.config.operation_interpolation_frequency;
        self.map_with_frequency(identifier, functor, field, frequency)
    }

    /// Add a named map sampled `frequency` times instead of the configured count.
    pub fn map_with_frequency<F: MapFunctor + 'static>(
        &mut self,
        identifier: &str,
        functor: F,
        field: &View,
        frequency: usize,
    ) -> Result<PatternId> {
        self.space.get(field.data())?;
        for view in functor.consumes() {
            self.space.get(view.data())?;
        }

        let id = PatternId(self.next_pattern);
        self.next_pattern += 1;
        let pattern = Pattern::create(
            id,
            identifier,
            Box::new(functor),
            field.clone(),
            frequency,
        )?;
        self.place(pattern)?;
        Ok(id)
    }

    /// Fuse `pattern` into an existing step or append a new one.
    fn place(&mut self, pattern: Pattern) -> Result<usize> {
        if self.steps.is_empty() || !self.config.synchronization_efficiency {
            return Ok(self.append(pattern));
        }

        let len = self.steps.len();
        let history = match self.config.synchronization_efficiency_length {
            Some(length) => length.min(len),
            None => len,
        };

        // Without a conflict the pattern bubbles up to the oldest step examined
        let mut target = len - history;
        for i in 0..history {
            let candidate = len - 1 - i;
            if self.steps[candidate].happens_before(&pattern, &self.space)? {
                if i == 0 {
                    return Ok(self.append(pattern));
                }
                target = candidate + 1;
                break;
            }
        }

        if target == len {
            return Ok(self.append(pattern));
        }
        debug!(
            "Fusing '{}' into step {} of {}",
            pattern.identifier(),
            target,
            len
        );
        self.steps[target].add_pattern(pattern);
        Ok(target)
    }

    fn append(&mut self, pattern: Pattern) -> usize {
        let index = self.steps.len();
        debug!("Appending '{}' as step {}", pattern.identifier(), index);
        let mut step = Step::new(index);
        step.add_pattern(pattern);
        self.steps.push(step);
        index
    }

    /// Freeze the sequence without materializing any buffer.
    pub fn compile(self) -> Result<Apt> {
        self.compile_with(&mut SymbolicBackend::new())
    }

    /// Freeze the sequence, materializing every data block once through `backend`.
    pub fn compile_with(self, backend: &mut dyn ExecutionBackend) -> Result<Apt> {
        for data in self.space.blocks() {
            backend.materialize(data)?;
        }
        let patterns: usize = self.steps.iter().map(|s| s.len()).sum();
        info!(
            "Compiled {} patterns into {} steps over {} data blocks",
            patterns,
            self.steps.len(),
            self.space.len()
        );
        Ok(Apt {
            space: self.space,
            steps: self.steps,
        })
    }
}

/// A compiled, schedulable step sequence.
#[derive(Debug)]
pub struct Apt {
    space: DataSpace,
    steps: Vec<Step>,
}

impl Apt {
    pub fn space(&self) -> &DataSpace {
        &self.space
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Mutable access for schedulers driving splits and assignments by hand.
    pub fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.steps.get_mut(index)
    }

    /// Let `optimizer` split and assign every step, in order.
    ///
    /// # Errors
    /// Returns `SimError::IncompleteStep` for the first step the optimizer
    /// leaves with unassigned splits.
    pub fn optimize(&mut self, optimizer: &mut dyn Optimizer) -> Result<f64> {
        optimizer.init(&self.steps, &self.space)?;
        for step in self.steps.iter_mut() {
            optimizer.assign(step, &self.space)?;
            if !step.complete() {
                warn!(
                    "Step {} left incomplete: {} of {} splits assigned",
                    step.index(),
                    step.assigned_count(),
                    step.splits().len()
                );
                return Err(incomplete(step));
            }
        }
        let costs = optimizer.costs();
        info!("Optimized {} steps, estimated cost {:.6e}", self.steps.len(), costs);
        Ok(costs)
    }

    /// Replay every step through `model` and return its runtime.
    pub fn evaluate(&self, model: &mut dyn PerformanceModel) -> Result<f64> {
        for step in &self.steps {
            if !step.complete() {
                return Err(incomplete(step));
            }
            model.update(step, &self.space)?;
        }
        let runtime = model.runtime();
        info!("Evaluated {} steps, runtime {:.6e}s", self.steps.len(), runtime);
        Ok(runtime)
    }

    pub fn report(&self, cluster: &Cluster) -> Result<AptReport> {
        AptReport::build(self, cluster)
    }
}

fn incomplete(step: &Step) -> SimError {
    SimError::IncompleteStep {
        index: step.index(),
        assigned: step.assigned_count(),
        splits: step.splits().len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::functors::ConstantCost;

    fn pattern_ids(step: &Step) -> Vec<usize> {
        step.patterns().iter().map(|p| p.id().0).collect()
    }

    #[test]
    fn test_frequency_changes_between_declarations() {
        let mut builder = AptBuilder::default();
        let coarse = builder.data("coarse", ElementKind::F64, &[1024]).unwrap();
        builder.set_data_interpolation_frequency(4);
        let fine = builder.data("fine", ElementKind::F64, &[1024]).unwrap();
        let explicit = builder
            .data_with_frequency("explicit", ElementKind::F64, &[1024], 8)
            .unwrap();

        let tiles = |v: &View| builder.space().get(v.data()).unwrap().basis().len();
        assert_eq!(tiles(&coarse), 32, "1024 / max(1024 / 32, 32)");
        assert_eq!(tiles(&fine), 4, "1024 / max(1024 / 4, 4)");
        assert_eq!(tiles(&explicit), 8);

        builder.map_named("default", ConstantCost, &coarse).unwrap();
        builder.set_operation_interpolation_frequency(4);
        builder.map_named("four", ConstantCost, &fine).unwrap();
        builder
            .map_with_frequency("one", ConstantCost, &explicit, 1)
            .unwrap();

        let sampled: Vec<Vec<usize>> = builder.steps()[0]
            .patterns()
            .iter()
            .map(|p| p.sampled_indices())
            .collect();
        assert_eq!(sampled[0], vec![0, 512, 1023]);
        assert_eq!(sampled[1], vec![0, 256, 512, 768, 1023]);
        assert_eq!(sampled[2], vec![0, 1023]);
    }

    #[test]
    fn test_zero_frequency_is_rejected() {
        let mut builder = AptBuilder::default();
        let a = builder.data("a", ElementKind::F64, &[64]).unwrap();
        builder.set_data_interpolation_frequency(0);
        assert!(builder.data("b", ElementKind::F64, &[64]).is_err());
        assert!(builder.map_with_frequency("m", ConstantCost, &a, 0).is_err());
        assert!(builder.steps().is_empty());
    }

    #[test]
    fn test_dependent_maps_append() {
        let mut builder = AptBuilder::default();
        let a = builder.data("a", ElementKind::F64, &[64]).unwrap();
        for _ in 0..3 {
            builder.map(ConstantCost, &a).unwrap();
        }
        assert_eq!(builder.steps().len(), 3);
        assert_eq!(builder.steps()[2].index(), 2);
    }

    #[test]
    fn test_independent_maps_fuse() {
        let mut builder = AptBuilder::default();
        let views: Vec<View> = ["a", "b", "c"]
            .iter()
            .map(|name| builder.data(name, ElementKind::F64, &[64]).unwrap())
            .collect();
        for view in &views {
            builder.map(ConstantCost, view).unwrap();
        }
        assert_eq!(builder.steps().len(), 1);
        assert_eq!(pattern_ids(&builder.steps()[0]), vec![0, 1, 2]);
    }

    #[test]
    fn test_bubble_up() {
        let mut builder = AptBuilder::default();
        let a = builder.data("a", ElementKind::F64, &[64]).unwrap();
        let b = builder.data("b", ElementKind::F64, &[64]).unwrap();
        builder.map(ConstantCost, &a).unwrap();
        builder.map(ConstantCost, &a).unwrap();
        builder.map(ConstantCost, &b).unwrap();

        assert_eq!(builder.steps().len(), 2);
        assert_eq!(pattern_ids(&builder.steps()[0]), vec![0, 2]);
        assert_eq!(pattern_ids(&builder.steps()[1]), vec![1]);
    }

    #[test]
    fn test_lookback_bound() {
        let mut builder = AptBuilder::default();
        let a = builder.data("a", ElementKind::F64, &[64]).unwrap();
        let b = builder.data("b", ElementKind::F64, &[64]).unwrap();
        builder.map(ConstantCost, &a).unwrap();
        builder.map(ConstantCost, &a).unwrap();
        builder.map(ConstantCost, &a).unwrap();

        builder.set_synchronization_efficiency_length(Some(1));
        builder.map(ConstantCost, &b).unwrap();
        assert_eq!(builder.steps().len(), 3);
        assert_eq!(pattern_ids(&builder.steps()[2]), vec![2, 3]);

        builder.set_synchronization_efficiency_length(Some(0));
        builder.map(ConstantCost, &b).unwrap();
        assert_eq!(builder.steps().len(), 4, "zero lookback never fuses");
    }

    #[test]
    fn test_disabled_fusion_appends() {
        let mut builder = AptBuilder::new(SimConfig {
            synchronization_efficiency: false,
            ..SimConfig::default()
        });
        let a = builder.data("a", ElementKind::F64, &[64]).unwrap();
        let b = builder.data("b", ElementKind::F64, &[64]).unwrap();
        builder.map(ConstantCost, &a).unwrap();
        builder.map(ConstantCost, &b).unwrap();
        assert_eq!(builder.steps().len(), 2);
    }

    #[test]
    fn test_pattern_names_are_sequential() {
        let mut builder = AptBuilder::default();
        let a = builder.data("a", ElementKind::F64, &[64]).unwrap();
        builder.map(ConstantCost, &a).unwrap();
        builder.map_named("relax", ConstantCost, &a).unwrap();
        builder.map(ConstantCost, &a).unwrap();

        let names: Vec<&str> = builder
            .steps()
            .iter()
            .map(|s| s.patterns()[0].identifier())
            .collect();
        assert_eq!(names, vec!["map-0", "relax", "map-2"]);
    }

    #[test]
    fn test_map_over_foreign_view_fails() {
        let mut other = AptBuilder::default();
        other.data("x", ElementKind::F64, &[8]).unwrap();
        let foreign = other.data("y", ElementKind::F64, &[8]).unwrap();

        let mut builder = AptBuilder::default();
        assert!(matches!(
            builder.map(ConstantCost, &foreign),
            Err(SimError::UnknownData(_))
        ));
    }

    #[test]
    fn test_compile_materializes_each_block_once() {
        let mut builder = AptBuilder::default();
        let a = builder.data("a", ElementKind::F64, &[64]).unwrap();
        builder.data("b", ElementKind::I32, &[10, 10]).unwrap();
        builder.map(ConstantCost, &a).unwrap();

        let mut backend = SymbolicBackend::new();
        let apt = builder.compile_with(&mut backend).unwrap();
        assert_eq!(backend.materialized().len(), 2);
        assert_eq!(backend.bytes(), 64 * 8 + 100 * 4);
        assert_eq!(apt.len(), 1);
    }

    #[test]
    fn test_evaluate_rejects_unassigned_steps() {
        let mut builder = AptBuilder::default();
        let a = builder.data("a", ElementKind::F64, &[64]).unwrap();
        builder.map(ConstantCost, &a).unwrap();
        let apt = builder.compile().unwrap();

        struct NoModel;
        impl PerformanceModel for NoModel {
            fn update(&mut self, _step: &Step, _space: &DataSpace) -> Result<()> {
                Ok(())
            }
            fn runtime(&self) -> f64 {
                0.0
            }
        }
        let err = apt.evaluate(&mut NoModel).unwrap_err();
        assert!(matches!(
            err,
            SimError::IncompleteStep { index: 0, assigned: 0, splits: 1 }
        ));
    }
}

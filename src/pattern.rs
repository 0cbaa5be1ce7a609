//! Index-parallel map operations and their sampled cost functions
//!
//! A [`Pattern`] applies a [`MapFunctor`] to every row of a produced view.
//! Evaluating the functor at every index would cost as much as running the
//! program, so only a handful of indices are *touched* (sampled) when the
//! pattern is created; the cost at any other index is linearly interpolated
//! between the nearest samples.
//!
//! Touching an index either asks the functor for an analytic estimate
//! ([`MapFunctor::touch`]) or runs the functor once on an [`Element`] that
//! counts floating point operations.

use crate::data::DataId;
use crate::error::{Result, SimError};
use crate::view::View;
use log::debug;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PatternId(pub usize);

/// Cost sample of one index.
#[derive(Clone, Debug, Default)]
pub struct PatternIndexInfo {
    pub index: usize,
    pub flops: f64,
    /// Per-block sub-views this index actually reads; blocks without an
    /// entry fall back to the full consumed view
    pub subviews: HashMap<DataId, View>,
}

/// Instrumented element handed to [`MapFunctor::execute`].
///
/// Arithmetic on a real element type would bump a counter per scalar
/// operation; here the functor reports its operations explicitly.
#[derive(Debug)]
pub struct Element {
    view: View,
    flops: f64,
}

impl Element {
    pub fn new(view: View) -> Self {
        Element { view, flops: 0.0 }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    /// Record `n` operations applied to every scalar of this element.
    pub fn op(&mut self, n: usize) {
        self.flops += (n * self.view.elements()) as f64;
    }

    /// Record operations that are not element-wise.
    pub fn add_flops(&mut self, flops: f64) {
        self.flops += flops;
    }

    pub fn flops(&self) -> f64 {
        self.flops
    }

    pub fn reset(&mut self) {
        self.flops = 0.0;
    }
}

/// User-supplied body of a map.
pub trait MapFunctor {
    /// Run the body for one index of the produced view.
    fn execute(&self, index: usize, element: &mut Element);

    /// Views read in addition to the produced view.
    fn consumes(&self) -> Vec<View> {
        Vec::new()
    }

    /// Optionally estimate the cost of `index` without executing.
    ///
    /// Returning `true` means `info` has been filled and [`Self::execute`]
    /// is skipped.
    fn touch(&self, _index: usize, _info: &mut PatternIndexInfo) -> bool {
        false
    }
}

/// One map operation over a view.
pub struct Pattern {
    id: PatternId,
    identifier: String,
    width: usize,
    field: View,
    consumes: Vec<View>,
    produces: Vec<View>,
    functor: Box<dyn MapFunctor>,
    samples: RefCell<BTreeMap<usize, PatternIndexInfo>>,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("id", &self.id)
            .field("identifier", &self.identifier)
            .field("width", &self.width)
            .field("field", &self.field)
            .field("samples", &self.samples.borrow().len())
            .finish()
    }
}

impl Pattern {
    /// Build a map over `field` and sample its cost.
    ///
    /// Samples are taken at `0, step, 2*step, ...` with
    /// `step = max(width / frequency, 1)`, plus the last index.
    pub fn create(
        id: PatternId,
        identifier: &str,
        functor: Box<dyn MapFunctor>,
        field: View,
        frequency: usize,
    ) -> Result<Self> {
        let width = field.shape().first().copied().unwrap_or(0);
        if width == 0 {
            return Err(SimError::InvalidShape {
                identifier: identifier.to_string(),
                reason: "a map needs a non-empty index domain".to_string(),
            });
        }
        if frequency == 0 {
            return Err(SimError::InvalidShape {
                identifier: identifier.to_string(),
                reason: "interpolation frequency must be at least 1".to_string(),
            });
        }

        let mut consumes = vec![field.clone()];
        consumes.extend(functor.consumes());

        let pattern = Pattern {
            id,
            identifier: identifier.to_string(),
            width,
            produces: vec![field.clone()],
            field,
            consumes,
            functor,
            samples: RefCell::new(BTreeMap::new()),
        };

        let step = std::cmp::max(width / frequency, 1);
        for index in (0..width).step_by(step) {
            pattern.touch(index)?;
        }
        pattern.touch(width - 1)?;
        debug!(
            "Pattern '{}' sampled at {} of {} indices",
            pattern.identifier,
            pattern.samples.borrow().len(),
            width
        );
        Ok(pattern)
    }

    pub fn id(&self) -> PatternId {
        self.id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Size of the index domain
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn consumes(&self) -> &[View] {
        &self.consumes
    }

    pub fn produces(&self) -> &[View] {
        &self.produces
    }

    /// Indices with a stored sample, ascending
    pub fn sampled_indices(&self) -> Vec<usize> {
        self.samples.borrow().keys().copied().collect()
    }

    pub fn is_sampled(&self, index: usize) -> bool {
        self.samples.borrow().contains_key(&index)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.width {
            return Err(SimError::OutOfBounds {
                begin: index,
                end: index + 1,
                extent: self.width,
            });
        }
        Ok(())
    }

    /// Evaluate and store the cost of one index.
    pub fn touch(&self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let mut info = PatternIndexInfo {
            index,
            ..PatternIndexInfo::default()
        };
        if !self.functor.touch(index, &mut info) {
            let mut element = Element::new(self.subflow_out(index)?);
            element.reset();
            self.functor.execute(index, &mut element);
            info.flops = element.flops();
        }
        self.samples.borrow_mut().insert(index, info);
        Ok(())
    }

    /// Cost of one index.
    ///
    /// Sampled indices are exact. Otherwise the index is touched when
    /// `touch` is set, or interpolated between the closest samples below
    /// and above it.
    pub fn flops(&self, index: usize, touch: bool) -> Result<f64> {
        self.check_index(index)?;
        if let Some(info) = self.samples.borrow().get(&index) {
            return Ok(info.flops);
        }
        if touch {
            self.touch(index)?;
            return Ok(self.samples.borrow()[&index].flops);
        }

        let samples = self.samples.borrow();
        let lower = samples.range(..index).next_back();
        let upper = samples.range(index + 1..).next();
        match (lower, upper) {
            (Some((&lo, lo_info)), Some((&hi, hi_info))) => {
                let slope = (hi_info.flops - lo_info.flops) / (hi - lo) as f64;
                Ok(slope * (index - lo) as f64 + lo_info.flops)
            }
            _ => Err(SimError::InsufficientSamples {
                pattern: self.identifier.clone(),
                index,
            }),
        }
    }

    /// Estimated cost of the whole domain: mean sample cost times width.
    pub fn total_flops(&self) -> f64 {
        let samples = self.samples.borrow();
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.values().map(|info| info.flops).sum();
        sum / samples.len() as f64 * self.width as f64
    }

    /// Part of `data` read while computing `index`.
    pub fn subflow_in(&self, index: usize, data: DataId) -> Result<View> {
        self.check_index(index)?;
        if !self.is_sampled(index) {
            self.touch(index)?;
        }
        if let Some(view) = self.samples.borrow()[&index].subviews.get(&data) {
            return Ok(view.clone());
        }
        self.consumes
            .iter()
            .find(|view| view.data() == data)
            .cloned()
            .ok_or(SimError::UnknownData(data))
    }

    /// Part of the produced view written by `index`.
    pub fn subflow_out(&self, index: usize) -> Result<View> {
        self.field.row(index)
    }
}

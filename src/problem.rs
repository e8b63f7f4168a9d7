//! The driver-facing problem: one model plus its runtime storage.
//!
//! This is the entire boundary an optimizer consumes: build a [`Model`],
//! wrap it in a [`Problem`], `setup()`, set values, `run_model()` to
//! converge the coupled system, and `compute_totals()` for exact
//! derivatives at the converged state.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::comm::{Communicator, SerialComm};
use crate::derivatives::{self, Totals, TotalsMode};
use crate::error::{ConfigurationError, Error, SolveError};
use crate::jacobian::ComponentPartials;
use crate::solvers::linear::LinearCache;
use crate::solvers::nonlinear::{solve_group, SolveCtx};
use crate::solvers::SolveReport;
use crate::system::{Col, Model, SystemNode};
use crate::vector::Vectors;

/// A model ready to solve and differentiate.
pub struct Problem {
    model: Model,
    vectors: Vectors,
    partials: Vec<Option<ComponentPartials>>,
    caches: BTreeMap<usize, LinearCache>,
    comm: Box<dyn Communicator>,
    /// State version and convergence flag of the last completed solve.
    last_solve: Option<(u64, bool)>,
}

impl Problem {
    /// Wrap a model with the single-process communicator.
    pub fn new(model: Model) -> Self {
        Problem::with_comm(model, Box::new(SerialComm))
    }

    /// Wrap a model with an injected communicator.
    pub fn with_comm(model: Model, comm: Box<dyn Communicator>) -> Self {
        Problem {
            model,
            vectors: Vectors::default(),
            partials: Vec::new(),
            caches: BTreeMap::new(),
            comm,
            last_solve: None,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// The model, for construction before `setup`.
    pub fn model_mut(&mut self) -> &mut Model {
        assert!(!self.model.is_setup(), "the model is immutable after setup");
        &mut self.model
    }

    /// Finalize the model and allocate runtime storage.
    pub fn setup(&mut self) -> Result<(), ConfigurationError> {
        self.model.setup()?;

        self.vectors = Vectors::new(self.model.state_len, self.model.param_len);
        for (id, meta) in self.model.registry.iter() {
            if let Some((start, len)) = self.model.state_range[id.index()] {
                self.vectors.state[start..start + len].copy_from_slice(&meta.default);
            }
            if let Some((start, len)) = self.model.param_range[id.index()] {
                self.vectors.params[start..start + len].copy_from_slice(&meta.default);
            }
        }

        self.partials = (0..self.model.systems.len())
            .map(|idx| match &self.model.systems[idx] {
                SystemNode::Component(_) => Some(ComponentPartials::new(&self.model, idx)),
                SystemNode::Group(_) => None,
            })
            .collect();
        Ok(())
    }

    fn value_slot(&self, path: &str) -> Result<(Range<usize>, bool), ConfigurationError> {
        let id = self.model.registry.lookup(path)?;
        let meta = self.model.registry.meta(id);
        if meta.role.is_output() {
            let (start, len) = self.model.state_range_of(id);
            return Ok((start..start + len, true));
        }
        match self.model.input_col(id) {
            Col::Param(start) => Ok((start..start + meta.len(), false)),
            Col::State(_) => Err(ConfigurationError::NotSettable(path.to_string())),
        }
    }

    /// Set an output's value (initial guess or independent source value) or
    /// an unconnected input.
    pub fn set_val(&mut self, path: &str, values: &[f64]) -> Result<(), ConfigurationError> {
        let (range, is_state) = self.value_slot(path)?;
        if values.len() != range.len() {
            return Err(ConfigurationError::ValueLength {
                path: path.to_string(),
                got: values.len(),
                expected: range.len(),
            });
        }
        let dst = if is_state {
            self.vectors.state_mut(range)
        } else {
            self.vectors.params_mut(range)
        };
        dst.copy_from_slice(values);
        Ok(())
    }

    /// Scalar convenience for length-1 variables.
    pub fn set_scalar(&mut self, path: &str, value: f64) -> Result<(), ConfigurationError> {
        self.set_val(path, &[value])
    }

    /// Read a variable's current value. Connected inputs read through to
    /// their source output.
    pub fn get_val(&self, path: &str) -> Result<&[f64], ConfigurationError> {
        let id = self.model.registry.lookup(path)?;
        let meta = self.model.registry.meta(id);
        if meta.role.is_output() {
            let (start, len) = self.model.state_range_of(id);
            return Ok(self.vectors.state(start..start + len));
        }
        match self.model.input_col(id) {
            Col::Param(start) => Ok(self.vectors.params(start..start + meta.len())),
            Col::State(start) => Ok(self.vectors.state(start..start + meta.len())),
        }
    }

    /// Scalar convenience for length-1 variables.
    pub fn get_scalar(&self, path: &str) -> Result<f64, ConfigurationError> {
        Ok(self.get_val(path)?[0])
    }

    /// Drive the whole hierarchy to a self-consistent state.
    ///
    /// Non-convergence raises only where a solver has `err_on_non_converge`
    /// set; otherwise the report carries `converged: false` and the
    /// best-available state stays in place.
    pub fn run_model(&mut self) -> Result<SolveReport, SolveError> {
        assert!(self.model.is_setup(), "call setup() before run_model()");
        let mut ctx = SolveCtx {
            model: &self.model,
            vectors: &mut self.vectors,
            partials: &mut self.partials,
            caches: &mut self.caches,
            comm: self.comm.as_ref(),
        };
        let report = solve_group(&mut ctx, 0)?;
        self.last_solve = Some((self.vectors.version(), report.converged));
        Ok(report)
    }

    /// Exact total derivatives of `of` outputs with respect to `wrt` seeds
    /// at the converged state.
    ///
    /// `mode` forces forward or reverse; `None` picks reverse when the `of`
    /// side has fewer total entries and forward otherwise (ties included).
    ///
    /// Requires the last `run_model` to have converged with no state
    /// mutation since; anything else is [`SolveError::UnconvergedState`].
    pub fn compute_totals(
        &mut self,
        of: &[&str],
        wrt: &[&str],
        mode: Option<TotalsMode>,
    ) -> Result<Totals, Error> {
        match self.last_solve {
            Some((version, true)) if version == self.vectors.version() => {}
            _ => return Err(SolveError::UnconvergedState.into()),
        }
        derivatives::compute_totals(
            &self.model,
            &self.vectors,
            &mut self.partials,
            &mut self.caches,
            of,
            wrt,
            mode,
        )
    }

    /// The residual values of an output variable after the last solve.
    pub fn get_residuals(&self, path: &str) -> Result<&[f64], ConfigurationError> {
        let id = self.model.registry.lookup(path)?;
        if !self.model.registry.meta(id).role.is_output() {
            return Err(ConfigurationError::NotAnOutput(path.to_string()));
        }
        let (start, len) = self.model.state_range_of(id);
        Ok(self.vectors.residuals(start..start + len))
    }
}

//! Ready-made components.
//!
//! [`IndepVar`] holds independent values (design variables and other free
//! parameters) as outputs; [`FuncComp`] wraps a closure as an explicit
//! component; [`Balance`] is an implicit component whose residual drives
//! two inputs to equality.

use num_complex::Complex64;

use crate::approx_partials::DerivMethod;
use crate::component::{
    ComponentSetup, ExplicitComponent, ImplicitComponent, Partials, Values, ValuesMut,
};
use crate::error::ComponentError;

/// A source of independent values.
///
/// Each declared output simply holds its assigned value: `compute` is a
/// no-op, the residual form is `y - value = 0`, and the outputs are valid
/// derivative seeds. An `IndepVar` has no inputs by construction.
#[derive(Default)]
pub struct IndepVar {
    outputs: Vec<(String, Vec<f64>, Option<String>)>,
}

impl IndepVar {
    pub fn new() -> Self {
        IndepVar::default()
    }

    /// Declare an output with an initial value.
    pub fn add(mut self, name: &str, value: &[f64]) -> Self {
        self.outputs.push((name.to_string(), value.to_vec(), None));
        self
    }

    /// Declare a scalar output.
    pub fn add_scalar(self, name: &str, value: f64) -> Self {
        self.add(name, &[value])
    }

    /// Declare an output with units.
    pub fn add_with_units(mut self, name: &str, value: &[f64], units: &str) -> Self {
        self.outputs
            .push((name.to_string(), value.to_vec(), Some(units.to_string())));
        self
    }
}

impl ExplicitComponent for IndepVar {
    fn setup(&self, setup: &mut ComponentSetup) {
        for (name, value, units) in &self.outputs {
            let b = setup.add_output(name, value.len()).default(value);
            if let Some(u) = units {
                b.units(u);
            }
        }
    }

    fn compute(
        &self,
        _inputs: &Values<f64>,
        _outputs: &mut ValuesMut<f64>,
    ) -> Result<(), ComponentError> {
        // Outputs keep whatever values they hold
        Ok(())
    }
}

type ComputeFn = dyn Fn(&Values<f64>, &mut ValuesMut<f64>) -> Result<(), ComponentError>
    + Send
    + Sync;
type ComplexFn = dyn Fn(&Values<Complex64>, &mut ValuesMut<Complex64>) -> Result<(), ComponentError>
    + Send
    + Sync;
type PartialsFn = dyn Fn(&Values<f64>, &mut Partials) -> Result<(), ComponentError> + Send + Sync;

/// An explicit component defined by a closure.
///
/// Partials default to central finite differences over every
/// (output, input) pair; supply an analytic closure with
/// [`FuncComp::partials`], a complex evaluation path with
/// [`FuncComp::complex`], or a different scheme with [`FuncComp::method`].
pub struct FuncComp {
    inputs: Vec<(String, Vec<f64>)>,
    outputs: Vec<(String, usize)>,
    compute: Box<ComputeFn>,
    complex: Option<Box<ComplexFn>>,
    partials_fn: Option<Box<PartialsFn>>,
    method: DerivMethod,
}

impl FuncComp {
    pub fn new(
        f: impl Fn(&Values<f64>, &mut ValuesMut<f64>) -> Result<(), ComponentError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        FuncComp {
            inputs: Vec::new(),
            outputs: Vec::new(),
            compute: Box::new(f),
            complex: None,
            partials_fn: None,
            method: DerivMethod::central(),
        }
    }

    /// Declare an input with a default value.
    pub fn input(mut self, name: &str, default: &[f64]) -> Self {
        self.inputs.push((name.to_string(), default.to_vec()));
        self
    }

    /// Declare a scalar input.
    pub fn input_scalar(self, name: &str, default: f64) -> Self {
        self.input(name, &[default])
    }

    /// Declare an output.
    pub fn output(mut self, name: &str, len: usize) -> Self {
        self.outputs.push((name.to_string(), len));
        self
    }

    /// Declare a scalar output.
    pub fn output_scalar(self, name: &str) -> Self {
        self.output(name, 1)
    }

    /// Supply analytic partials for every declared pair.
    pub fn partials(
        mut self,
        f: impl Fn(&Values<f64>, &mut Partials) -> Result<(), ComponentError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.partials_fn = Some(Box::new(f));
        self
    }

    /// Supply a complex evaluation path and switch the default
    /// approximation to the complex step.
    pub fn complex(
        mut self,
        f: impl Fn(&Values<Complex64>, &mut ValuesMut<Complex64>) -> Result<(), ComponentError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.complex = Some(Box::new(f));
        self.method = DerivMethod::complex_step();
        self
    }

    /// Approximation scheme for pairs without analytic partials.
    pub fn method(mut self, method: DerivMethod) -> Self {
        self.method = method;
        self
    }
}

impl ExplicitComponent for FuncComp {
    fn setup(&self, setup: &mut ComponentSetup) {
        for (name, default) in &self.inputs {
            setup.add_input(name, default.len()).default(default);
        }
        for (name, len) in &self.outputs {
            setup.add_output(name, *len);
        }
        let method = if self.partials_fn.is_some() {
            DerivMethod::Analytic
        } else {
            self.method
        };
        for (of, _) in &self.outputs {
            for (wrt, _) in &self.inputs {
                setup.declare_partials(of, wrt).method(method);
            }
        }
    }

    fn compute(
        &self,
        inputs: &Values<f64>,
        outputs: &mut ValuesMut<f64>,
    ) -> Result<(), ComponentError> {
        (self.compute)(inputs, outputs)
    }

    fn compute_partials(
        &self,
        inputs: &Values<f64>,
        partials: &mut Partials,
    ) -> Result<(), ComponentError> {
        match &self.partials_fn {
            Some(f) => f(inputs, partials),
            None => Ok(()),
        }
    }

    fn supports_complex(&self) -> bool {
        self.complex.is_some()
    }

    fn compute_complex(
        &self,
        inputs: &Values<Complex64>,
        outputs: &mut ValuesMut<Complex64>,
    ) -> Result<(), ComponentError> {
        match &self.complex {
            Some(f) => f(inputs, outputs),
            None => Err(ComponentError::msg("complex evaluation not implemented")),
        }
    }
}

/// An implicit component driving `lhs` and `rhs` to equality.
///
/// The declared output is the state the surrounding coupling adjusts;
/// its residual is `lhs - rhs`. Both partials are constant identity
/// blocks; the state column comes entirely from the coupled system.
pub struct Balance {
    output: String,
    len: usize,
}

impl Balance {
    pub fn new(output: &str, len: usize) -> Self {
        Balance {
            output: output.to_string(),
            len,
        }
    }
}

impl ImplicitComponent for Balance {
    fn setup(&self, setup: &mut ComponentSetup) {
        setup.add_output(&self.output, self.len);
        setup.add_input("lhs", self.len);
        setup.add_input("rhs", self.len);
        let diag: Vec<u32> = (0..self.len as u32).collect();
        setup
            .declare_partials(&self.output, "lhs")
            .rows_cols(&diag, &diag);
        setup
            .declare_partials(&self.output, "rhs")
            .rows_cols(&diag, &diag);
    }

    fn apply_nonlinear(
        &self,
        inputs: &Values<f64>,
        _outputs: &Values<f64>,
        residuals: &mut ValuesMut<f64>,
    ) -> Result<(), ComponentError> {
        let lhs = inputs.get("lhs");
        let rhs = inputs.get("rhs");
        let r = residuals.get_mut(&self.output);
        for k in 0..r.len() {
            r[k] = lhs[k] - rhs[k];
        }
        Ok(())
    }

    fn linearize(
        &self,
        _inputs: &Values<f64>,
        _outputs: &Values<f64>,
        partials: &mut Partials,
    ) -> Result<(), ComponentError> {
        partials.set_sparse(&self.output, "lhs", &vec![1.0; self.len]);
        partials.set_sparse(&self.output, "rhs", &vec![-1.0; self.len]);
        Ok(())
    }
}

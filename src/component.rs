//! Leaf component traits and the declaration surface.
//!
//! A leaf is either purely explicit (`compute(inputs) -> outputs`) or
//! implicit (`apply_nonlinear(inputs, outputs) -> residuals`); the two
//! capabilities are separate traits so a component can never be both.
//! Partials come from the component's own routine or from finite-difference
//! / complex-step approximation declared per block.

use num_complex::Complex64;

use crate::approx_partials::DerivMethod;
use crate::error::ComponentError;
use crate::variable::{VarMeta, VarRole};

/// Name-addressed read view over a component's local values.
///
/// Accessors panic on names the component never declared; that is a
/// programming error in the component, not a recoverable condition.
pub struct Values<'a, T = f64> {
    pub(crate) index: &'a [(String, usize, usize)],
    pub(crate) data: &'a [T],
}

impl<'a, T: Copy> Values<'a, T> {
    pub(crate) fn new(index: &'a [(String, usize, usize)], data: &'a [T]) -> Self {
        Values { index, data }
    }

    fn locate(&self, name: &str) -> (usize, usize) {
        for (n, off, len) in self.index {
            if n == name {
                return (*off, *len);
            }
        }
        panic!("component accessed undeclared variable '{name}'");
    }

    /// Slice of the named variable's entries.
    pub fn get(&self, name: &str) -> &[T] {
        let (off, len) = self.locate(name);
        &self.data[off..off + len]
    }

    /// First entry of the named variable, for scalars.
    pub fn scalar(&self, name: &str) -> T {
        self.get(name)[0]
    }
}

/// Name-addressed write view over a component's local values.
pub struct ValuesMut<'a, T = f64> {
    pub(crate) index: &'a [(String, usize, usize)],
    pub(crate) data: &'a mut [T],
}

impl<'a, T: Copy> ValuesMut<'a, T> {
    pub(crate) fn new(index: &'a [(String, usize, usize)], data: &'a mut [T]) -> Self {
        ValuesMut { index, data }
    }

    fn locate(&self, name: &str) -> (usize, usize) {
        for (n, off, len) in self.index {
            if n == name {
                return (*off, *len);
            }
        }
        panic!("component accessed undeclared variable '{name}'");
    }

    pub fn get(&self, name: &str) -> &[T] {
        let (off, len) = self.locate(name);
        &self.data[off..off + len]
    }

    pub fn scalar(&self, name: &str) -> T {
        self.get(name)[0]
    }

    /// Mutable slice of the named variable's entries.
    pub fn get_mut(&mut self, name: &str) -> &mut [T] {
        let (off, len) = self.locate(name);
        &mut self.data[off..off + len]
    }

    pub fn set(&mut self, name: &str, values: &[T]) {
        let dst = self.get_mut(name);
        assert_eq!(
            dst.len(),
            values.len(),
            "value length mismatch for '{name}'"
        );
        dst.copy_from_slice(values);
    }

    pub fn set_scalar(&mut self, name: &str, value: T) {
        self.get_mut(name)[0] = value;
    }
}

/// One declared partial-derivative block, as written by the component.
#[derive(Debug, Clone)]
pub(crate) struct PartialDecl {
    pub of: String,
    pub wrt: String,
    /// Within-block (row, col) sparsity; `None` means dense.
    pub sparsity: Option<(Vec<u32>, Vec<u32>)>,
    pub method: DerivMethod,
}

/// Declaration surface handed to a component's `setup`.
pub struct ComponentSetup {
    pub(crate) inputs: Vec<VarMeta>,
    pub(crate) outputs: Vec<VarMeta>,
    pub(crate) partials: Vec<PartialDecl>,
    output_role: VarRole,
}

impl ComponentSetup {
    pub(crate) fn new(output_role: VarRole) -> Self {
        ComponentSetup {
            inputs: Vec::new(),
            outputs: Vec::new(),
            partials: Vec::new(),
            output_role,
        }
    }

    /// Declare an input with the given flattened length.
    pub fn add_input(&mut self, name: &str, len: usize) -> VarBuilder<'_> {
        self.inputs.push(blank_meta(name, len, VarRole::Input));
        VarBuilder {
            meta: self.inputs.last_mut().unwrap(),
        }
    }

    /// Declare an output (state, for implicit components) with the given
    /// flattened length.
    pub fn add_output(&mut self, name: &str, len: usize) -> VarBuilder<'_> {
        self.outputs.push(blank_meta(name, len, self.output_role));
        VarBuilder {
            meta: self.outputs.last_mut().unwrap(),
        }
    }

    /// Declare a partial block `d(of)/d(wrt)`; dense and analytic unless
    /// refined through the returned builder.
    pub fn declare_partials(&mut self, of: &str, wrt: &str) -> PartialBuilder<'_> {
        self.partials.push(PartialDecl {
            of: of.to_string(),
            wrt: wrt.to_string(),
            sparsity: None,
            method: DerivMethod::Analytic,
        });
        PartialBuilder {
            decl: self.partials.last_mut().unwrap(),
        }
    }
}

fn blank_meta(name: &str, len: usize, role: VarRole) -> VarMeta {
    VarMeta {
        name: name.to_string(),
        path: String::new(),
        shape: vec![len],
        units: None,
        lower: None,
        upper: None,
        role,
        default: vec![0.0; len],
        owner: usize::MAX,
    }
}

/// Refines a variable declaration.
pub struct VarBuilder<'a> {
    meta: &'a mut VarMeta,
}

impl VarBuilder<'_> {
    /// Multi-dimensional shape; the flattened length is the product.
    pub fn shape(self, shape: &[usize]) -> Self {
        self.meta.shape = shape.to_vec();
        self.meta.default = vec![0.0; self.meta.len()];
        self
    }

    pub fn default(self, values: &[f64]) -> Self {
        assert_eq!(
            values.len(),
            self.meta.len(),
            "default length mismatch for '{}'",
            self.meta.name
        );
        self.meta.default = values.to_vec();
        self
    }

    /// Scalar default, for length-1 variables.
    pub fn value(self, v: f64) -> Self {
        assert_eq!(self.meta.len(), 1, "value() requires a scalar variable");
        self.meta.default = vec![v];
        self
    }

    pub fn units(self, units: &str) -> Self {
        self.meta.units = Some(units.to_string());
        self
    }

    pub fn lower(self, lower: f64) -> Self {
        self.meta.lower = Some(lower);
        self
    }

    pub fn upper(self, upper: f64) -> Self {
        self.meta.upper = Some(upper);
        self
    }
}

/// Refines a partial-block declaration.
pub struct PartialBuilder<'a> {
    decl: &'a mut PartialDecl,
}

impl PartialBuilder<'_> {
    /// Within-block sparsity as parallel row/col index lists.
    pub fn rows_cols(self, rows: &[u32], cols: &[u32]) -> Self {
        assert_eq!(rows.len(), cols.len(), "rows/cols length mismatch");
        self.decl.sparsity = Some((rows.to_vec(), cols.to_vec()));
        self
    }

    pub fn method(self, method: DerivMethod) -> Self {
        self.decl.method = method;
        self
    }

    /// Forward finite differences with the default step.
    pub fn fd(self) -> Self {
        self.method(DerivMethod::fd())
    }

    /// Central finite differences with the default step.
    pub fn central(self) -> Self {
        self.method(DerivMethod::central())
    }

    /// Complex-step approximation with the default step.
    pub fn complex_step(self) -> Self {
        self.method(DerivMethod::complex_step())
    }

    /// Override the perturbation step of an approximated block.
    pub fn step(self, step: f64) -> Self {
        match &mut self.decl.method {
            DerivMethod::Fd { step: s, .. } => *s = step,
            DerivMethod::ComplexStep { step: s } => *s = step,
            DerivMethod::Analytic => panic!("step() on an analytic partial"),
        }
        self
    }
}

/// Writer handed to partials routines.
///
/// Blocks must have been declared in `setup`; writes to undeclared blocks
/// panic. Sparse blocks take values aligned with the declared rows/cols.
pub struct Partials<'a> {
    pub(crate) decls: &'a [ResolvedPartial],
    pub(crate) values: &'a mut [Vec<f64>],
}

impl Partials<'_> {
    fn locate(&self, of: &str, wrt: &str) -> usize {
        for (k, d) in self.decls.iter().enumerate() {
            if d.of == of && d.wrt == wrt {
                return k;
            }
        }
        panic!("partial ({of}, {wrt}) was not declared in setup");
    }

    /// Write a dense block in row-major order.
    pub fn set_dense(&mut self, of: &str, wrt: &str, values: &[f64]) {
        let k = self.locate(of, wrt);
        let d = &self.decls[k];
        assert!(
            d.sparsity.is_none(),
            "partial ({of}, {wrt}) was declared sparse; use set_sparse"
        );
        assert_eq!(
            values.len(),
            d.of_len * d.wrt_len,
            "dense block ({of}, {wrt}) expects {} values",
            d.of_len * d.wrt_len
        );
        self.values[k].copy_from_slice(values);
    }

    /// Write a sparse block, values aligned with the declared rows/cols.
    pub fn set_sparse(&mut self, of: &str, wrt: &str, values: &[f64]) {
        let k = self.locate(of, wrt);
        let d = &self.decls[k];
        let nnz = d
            .sparsity
            .as_ref()
            .map(|(r, _)| r.len())
            .unwrap_or_else(|| panic!("partial ({of}, {wrt}) was declared dense; use set_dense"));
        assert_eq!(values.len(), nnz, "sparse block ({of}, {wrt}) expects {nnz} values");
        self.values[k].copy_from_slice(values);
    }

    /// Write a 1x1 block.
    pub fn set_scalar(&mut self, of: &str, wrt: &str, value: f64) {
        let k = self.locate(of, wrt);
        let d = &self.decls[k];
        assert_eq!(d.of_len * d.wrt_len, 1, "partial ({of}, {wrt}) is not scalar");
        self.values[k][0] = value;
    }
}

/// Which local variable a partial is taken with respect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WrtSlot {
    Input(usize),
    Output(usize),
}

/// A partial declaration resolved against the component's variable lists.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedPartial {
    pub of: String,
    pub wrt: String,
    /// Index into the component's output list.
    pub of_slot: usize,
    pub wrt_slot: WrtSlot,
    /// Offset/length of the `of` rows within the component's output block.
    pub of_offset: usize,
    pub of_len: usize,
    /// Offset/length of the `wrt` columns within the component's
    /// perturbation space (inputs first, then outputs for implicit leaves).
    pub wrt_offset: usize,
    pub wrt_len: usize,
    pub sparsity: Option<(Vec<u32>, Vec<u32>)>,
    pub method: DerivMethod,
}

impl ResolvedPartial {
    /// Number of stored values for this block.
    pub fn value_len(&self) -> usize {
        match &self.sparsity {
            Some((rows, _)) => rows.len(),
            None => self.of_len * self.wrt_len,
        }
    }
}

/// A leaf whose outputs are a direct function of its inputs.
pub trait ExplicitComponent: Send + Sync {
    /// Declare inputs, outputs and partials.
    fn setup(&self, setup: &mut ComponentSetup);

    /// Compute outputs from inputs.
    fn compute(
        &self,
        inputs: &Values<f64>,
        outputs: &mut ValuesMut<f64>,
    ) -> Result<(), ComponentError>;

    /// Fill the analytic partial blocks declared in `setup`.
    fn compute_partials(
        &self,
        _inputs: &Values<f64>,
        _partials: &mut Partials,
    ) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Whether `compute_complex` is implemented (the component's compute is
    /// analytic over the complex plane). Required for complex-step partials.
    fn supports_complex(&self) -> bool {
        false
    }

    /// Complex-valued evaluation used by the complex-step approximation.
    fn compute_complex(
        &self,
        _inputs: &Values<Complex64>,
        _outputs: &mut ValuesMut<Complex64>,
    ) -> Result<(), ComponentError> {
        Err(ComponentError::msg("complex evaluation not implemented"))
    }
}

/// A leaf defined by a residual over its inputs and its own outputs.
pub trait ImplicitComponent: Send + Sync {
    /// Declare inputs, outputs (states) and partials.
    fn setup(&self, setup: &mut ComponentSetup);

    /// Evaluate residuals at the given inputs and output values.
    fn apply_nonlinear(
        &self,
        inputs: &Values<f64>,
        outputs: &Values<f64>,
        residuals: &mut ValuesMut<f64>,
    ) -> Result<(), ComponentError>;

    /// Fill the analytic partial blocks (with respect to inputs and own
    /// outputs) declared in `setup`.
    fn linearize(
        &self,
        _inputs: &Values<f64>,
        _outputs: &Values<f64>,
        _partials: &mut Partials,
    ) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Whether `apply_nonlinear_complex` is implemented.
    fn supports_complex(&self) -> bool {
        false
    }

    /// Complex-valued residual evaluation used by the complex-step
    /// approximation.
    fn apply_nonlinear_complex(
        &self,
        _inputs: &Values<Complex64>,
        _outputs: &Values<Complex64>,
        _residuals: &mut ValuesMut<Complex64>,
    ) -> Result<(), ComponentError> {
        Err(ComponentError::msg("complex evaluation not implemented"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_lookup() {
        let index = vec![("x".to_string(), 0, 2), ("y".to_string(), 2, 1)];
        let data = [1.0, 2.0, 3.0];
        let vals = Values::new(&index, &data);
        assert_eq!(vals.get("x"), &[1.0, 2.0]);
        assert_eq!(vals.scalar("y"), 3.0);
    }

    #[test]
    #[should_panic(expected = "undeclared variable")]
    fn values_unknown_name_panics() {
        let index = vec![("x".to_string(), 0, 1)];
        let data = [1.0];
        let vals = Values::new(&index, &data);
        let _ = vals.get("z");
    }

    #[test]
    fn values_mut_set() {
        let index = vec![("y".to_string(), 0, 2)];
        let mut data = [0.0, 0.0];
        let mut vals = ValuesMut::new(&index, &mut data);
        vals.set("y", &[4.0, 5.0]);
        assert_eq!(vals.get("y"), &[4.0, 5.0]);
    }

    #[test]
    fn setup_builders() {
        let mut setup = ComponentSetup::new(VarRole::Output);
        setup.add_input("x", 3).units("m").default(&[1.0, 2.0, 3.0]);
        setup.add_output("y", 1).value(0.5).lower(-1.0).upper(1.0);
        setup
            .declare_partials("y", "x")
            .rows_cols(&[0, 0], &[0, 2])
            .fd();

        assert_eq!(setup.inputs[0].units.as_deref(), Some("m"));
        assert_eq!(setup.outputs[0].default, vec![0.5]);
        assert_eq!(setup.outputs[0].lower, Some(-1.0));
        let d = &setup.partials[0];
        assert_eq!(d.sparsity.as_ref().unwrap().0, vec![0, 0]);
        assert!(matches!(d.method, DerivMethod::Fd { .. }));
    }
}

//! Error taxonomy.
//!
//! Setup-time problems are [`ConfigurationError`]s and are always fatal.
//! Solve-time problems are [`SolveError`]s; non-convergence is only fatal
//! when the owning solver has `err_on_non_converge` set, otherwise it is
//! reported through the solve report instead of raised.
//!
//! Errors raised inside user component callbacks propagate unmodified as
//! [`ComponentError`]; the engine never catches or masks them.

use std::fmt;

use thiserror::Error;

/// A problem detected while building or finalizing the model.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A connection or request referenced a variable path that was never declared.
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    /// The source side of a connection is not an output.
    #[error("connection source '{0}' is not an output")]
    NotAnOutput(String),

    /// The target side of a connection is not an input.
    #[error("connection target '{0}' is not an input")]
    NotAnInput(String),

    /// Source and target shapes differ.
    #[error("shape mismatch connecting '{source}' {source_shape:?} to '{target}' {target_shape:?}")]
    ShapeMismatch {
        source: String,
        source_shape: Vec<usize>,
        target: String,
        target_shape: Vec<usize>,
    },

    /// Source and target declare different units.
    #[error("units mismatch connecting '{source}' ({source_units}) to '{target}' ({target_units})")]
    UnitsMismatch {
        source: String,
        source_units: String,
        target: String,
        target_units: String,
    },

    /// An input already has a source (fan-in is not allowed).
    #[error("input '{target}' is already connected to '{existing}'")]
    DuplicateConnection { target: String, existing: String },

    /// Two siblings or two variables on one component share a name.
    #[error("duplicate name '{0}'")]
    DuplicateName(String),

    /// A coupled (cyclic or implicit) part of the model sits under a group
    /// whose nonlinear solver cannot iterate it.
    #[error("group '{group}' contains coupled systems ({detail}) but has no suitable nonlinear solver")]
    SolverRequired { group: String, detail: String },

    /// A finite-difference or complex-step size too small to be resolved in
    /// working precision, or not positive.
    #[error("invalid perturbation step {step:e} for '{component}': {reason}")]
    InvalidStepSize {
        component: String,
        step: f64,
        reason: &'static str,
    },

    /// Complex-step partials were requested for a component that does not
    /// provide a complex evaluation path.
    #[error("component '{0}' declares complex-step partials but does not support complex evaluation")]
    ComplexStepUnsupported(String),

    /// A declared partial references a variable the component does not own.
    #[error("component '{component}' declares a partial of '{of}' with respect to '{wrt}' but does not declare both variables")]
    UnknownPartial {
        component: String,
        of: String,
        wrt: String,
    },

    /// Sparsity indices out of range for the declared block shape.
    #[error("sparsity indices out of range for partial ({of}, {wrt}) on '{component}'")]
    SparsityOutOfRange {
        component: String,
        of: String,
        wrt: String,
    },

    /// A `wrt` entry in a totals request is neither an unconnected input nor
    /// the output of an independent source component.
    #[error("'{0}' cannot be used as a derivative seed: it is neither an unconnected input nor an independent source output")]
    InvalidWrt(String),

    /// A value was assigned to a connected input; the source output owns
    /// that value.
    #[error("'{0}' is a connected input; set its source output instead")]
    NotSettable(String),

    /// A default or initial value has the wrong length for its shape.
    #[error("value for '{path}' has length {got}, expected {expected}")]
    ValueLength {
        path: String,
        got: usize,
        expected: usize,
    },
}

/// A problem raised while solving or differentiating the model.
#[derive(Debug, Error)]
pub enum SolveError {
    /// An iterative solver ran out of iterations with `err_on_non_converge` set.
    ///
    /// The best-available state is left in place for inspection.
    #[error("'{system}' did not converge in {iterations} iterations (residual norm {residual_norm:e})")]
    Convergence {
        system: String,
        iterations: usize,
        residual_norm: f64,
    },

    /// The direct linear solver detected a singular (rank-deficient) matrix.
    #[error("singular Jacobian while solving '{system}'")]
    SingularMatrix { system: String },

    /// Total derivatives were requested at a state that is not a converged
    /// solution of the model (never solved, solve failed, or the state was
    /// mutated after the last solve).
    #[error("total derivatives require a converged model state; call run_model() first")]
    UnconvergedState,

    /// An error raised by user component code, forwarded unmodified.
    #[error(transparent)]
    Component(#[from] ComponentError),
}

/// Either kind of engine error, for operations that can fail both ways
/// (a totals request validates its variable lists and then solves).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Solve(#[from] SolveError),
}

/// Opaque error from a user-supplied compute/residual/partials routine.
///
/// The engine forwards these without inspection; construct one with
/// [`ComponentError::new`] or [`ComponentError::msg`].
#[derive(Debug)]
pub struct ComponentError(Box<dyn std::error::Error + Send + Sync>);

impl ComponentError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        ComponentError(Box::new(err))
    }

    pub fn msg(msg: impl Into<String>) -> Self {
        ComponentError(msg.into().into())
    }
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ComponentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

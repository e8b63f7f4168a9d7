//! Configuration checking at setup: bad connections, shape and unit
//! mismatches, fan-in, missing solvers for coupled structure, and invalid
//! approximation options are all rejected before any solve runs.

use platypus::{
    Balance, ComponentError, ComponentSetup, ConfigurationError, DerivMethod, ExplicitComponent,
    FdForm, FuncComp, IndepVar, Model, NonlinearSolver, Problem, Values, ValuesMut,
};

/// One input, one output, both with configurable length and units.
struct Pipe {
    in_len: usize,
    out_len: usize,
    in_units: Option<&'static str>,
    out_units: Option<&'static str>,
}

impl Pipe {
    fn new(len: usize) -> Self {
        Pipe {
            in_len: len,
            out_len: len,
            in_units: None,
            out_units: None,
        }
    }
}

impl ExplicitComponent for Pipe {
    fn setup(&self, setup: &mut ComponentSetup) {
        let b = setup.add_input("x", self.in_len);
        if let Some(u) = self.in_units {
            b.units(u);
        }
        let b = setup.add_output("y", self.out_len);
        if let Some(u) = self.out_units {
            b.units(u);
        }
    }

    fn compute(
        &self,
        inputs: &Values<f64>,
        outputs: &mut ValuesMut<f64>,
    ) -> Result<(), ComponentError> {
        let n = self.in_len.min(self.out_len);
        let x = inputs.get("x")[..n].to_vec();
        outputs.get_mut("y")[..n].copy_from_slice(&x);
        Ok(())
    }
}

fn setup_err(model: Model) -> ConfigurationError {
    let mut prob = Problem::new(model);
    prob.setup().unwrap_err()
}

#[test]
fn unknown_connection_endpoint() {
    let mut model = Model::new();
    let root = model.root();
    model.add_explicit(root, "a", Pipe::new(1)).unwrap();
    model.connect("a.y", "nope.x");
    assert!(matches!(
        setup_err(model),
        ConfigurationError::UnknownVariable(path) if path == "nope.x"
    ));
}

#[test]
fn connection_source_must_be_an_output() {
    let mut model = Model::new();
    let root = model.root();
    model.add_explicit(root, "a", Pipe::new(1)).unwrap();
    model.add_explicit(root, "b", Pipe::new(1)).unwrap();
    model.connect("a.x", "b.x");
    assert!(matches!(
        setup_err(model),
        ConfigurationError::NotAnOutput(path) if path == "a.x"
    ));
}

#[test]
fn connection_target_must_be_an_input() {
    let mut model = Model::new();
    let root = model.root();
    model.add_explicit(root, "a", Pipe::new(1)).unwrap();
    model.add_explicit(root, "b", Pipe::new(1)).unwrap();
    model.connect("a.y", "b.y");
    assert!(matches!(
        setup_err(model),
        ConfigurationError::NotAnInput(path) if path == "b.y"
    ));
}

#[test]
fn shape_mismatch_is_rejected() {
    let mut model = Model::new();
    let root = model.root();
    model.add_explicit(root, "a", Pipe::new(2)).unwrap();
    model.add_explicit(root, "b", Pipe::new(3)).unwrap();
    model.connect("a.y", "b.x");
    assert!(matches!(
        setup_err(model),
        ConfigurationError::ShapeMismatch { .. }
    ));
}

#[test]
fn units_mismatch_is_rejected() {
    let mut model = Model::new();
    let root = model.root();
    model
        .add_explicit(
            root,
            "a",
            Pipe {
                out_units: Some("m"),
                ..Pipe::new(1)
            },
        )
        .unwrap();
    model
        .add_explicit(
            root,
            "b",
            Pipe {
                in_units: Some("ft"),
                ..Pipe::new(1)
            },
        )
        .unwrap();
    model.connect("a.y", "b.x");
    assert!(matches!(
        setup_err(model),
        ConfigurationError::UnitsMismatch { .. }
    ));
}

#[test]
fn matching_units_connect_cleanly() {
    let mut model = Model::new();
    let root = model.root();
    model
        .add_explicit(
            root,
            "a",
            Pipe {
                out_units: Some("m"),
                ..Pipe::new(1)
            },
        )
        .unwrap();
    model
        .add_explicit(
            root,
            "b",
            Pipe {
                in_units: Some("m"),
                ..Pipe::new(1)
            },
        )
        .unwrap();
    model.connect("a.y", "b.x");
    let mut prob = Problem::new(model);
    prob.setup().unwrap();
}

#[test]
fn fan_in_is_rejected() {
    let mut model = Model::new();
    let root = model.root();
    model.add_explicit(root, "a", Pipe::new(1)).unwrap();
    model.add_explicit(root, "b", Pipe::new(1)).unwrap();
    model.add_explicit(root, "c", Pipe::new(1)).unwrap();
    model.connect("a.y", "c.x");
    model.connect("b.y", "c.x");
    assert!(matches!(
        setup_err(model),
        ConfigurationError::DuplicateConnection { target, existing }
            if target == "c.x" && existing == "a.y"
    ));
}

#[test]
fn sibling_names_must_be_unique() {
    let mut model = Model::new();
    let root = model.root();
    model.add_explicit(root, "a", Pipe::new(1)).unwrap();
    let err = model.add_explicit(root, "a", Pipe::new(1)).unwrap_err();
    assert!(matches!(err, ConfigurationError::DuplicateName(name) if name == "a"));
}

#[test]
fn cycle_without_a_solver_is_rejected() {
    let mut model = Model::new();
    let root = model.root();
    model.add_explicit(root, "a", Pipe::new(1)).unwrap();
    model.add_explicit(root, "b", Pipe::new(1)).unwrap();
    model.connect("a.y", "b.x");
    model.connect("b.y", "a.x");
    // Root keeps the default single-pass solver
    assert!(matches!(
        setup_err(model),
        ConfigurationError::SolverRequired { .. }
    ));
}

#[test]
fn implicit_component_requires_newton() {
    let build = |nonlinear: Option<NonlinearSolver>| {
        let mut model = Model::new();
        let root = model.root();
        model
            .add_implicit(root, "bal", Balance::new("y", 1))
            .unwrap();
        model
            .add_explicit(root, "p", IndepVar::new().add_scalar("v", 1.0))
            .unwrap();
        model.connect("p.v", "bal.lhs");
        if let Some(solver) = nonlinear {
            model.set_nonlinear_solver(root, solver);
        }
        model
    };

    // Single-pass cannot drive a residual to zero
    assert!(matches!(
        setup_err(build(None)),
        ConfigurationError::SolverRequired { .. }
    ));
    // Neither can a plain Gauss-Seidel sweep
    assert!(matches!(
        setup_err(build(Some(NonlinearSolver::gauss_seidel()))),
        ConfigurationError::SolverRequired { .. }
    ));
    // Newton handles it
    let mut prob = Problem::new(build(Some(NonlinearSolver::newton())));
    prob.setup().unwrap();
}

#[test]
fn finite_difference_step_below_resolution_is_rejected() {
    let mut model = Model::new();
    let root = model.root();
    model
        .add_explicit(
            root,
            "f",
            FuncComp::new(|i, o| {
                o.set_scalar("y", i.scalar("x"));
                Ok(())
            })
            .input_scalar("x", 0.0)
            .output_scalar("y")
            .method(DerivMethod::Fd {
                form: FdForm::Forward,
                step: 1e-18,
            }),
        )
        .unwrap();
    assert!(matches!(
        setup_err(model),
        ConfigurationError::InvalidStepSize { step, .. } if step == 1e-18
    ));
}

#[test]
fn negative_step_is_rejected() {
    let mut model = Model::new();
    let root = model.root();
    model
        .add_explicit(
            root,
            "f",
            FuncComp::new(|i, o| {
                o.set_scalar("y", i.scalar("x"));
                Ok(())
            })
            .input_scalar("x", 0.0)
            .output_scalar("y")
            .method(DerivMethod::Fd {
                form: FdForm::Central,
                step: -1e-6,
            }),
        )
        .unwrap();
    assert!(matches!(
        setup_err(model),
        ConfigurationError::InvalidStepSize { .. }
    ));
}

#[test]
fn complex_step_requires_a_complex_path() {
    let mut model = Model::new();
    let root = model.root();
    model
        .add_explicit(
            root,
            "f",
            FuncComp::new(|i, o| {
                o.set_scalar("y", i.scalar("x"));
                Ok(())
            })
            .input_scalar("x", 0.0)
            .output_scalar("y")
            .method(DerivMethod::complex_step()),
        )
        .unwrap();
    assert!(matches!(
        setup_err(model),
        ConfigurationError::ComplexStepUnsupported(path) if path == "f"
    ));
}

#[test]
fn values_are_checked_after_setup() {
    let mut model = Model::new();
    let root = model.root();
    model.add_explicit(root, "a", Pipe::new(2)).unwrap();
    model.add_explicit(root, "b", Pipe::new(2)).unwrap();
    model.connect("a.y", "b.x");

    let mut prob = Problem::new(model);
    prob.setup().unwrap();

    // Wrong length
    let err = prob.set_val("a.y", &[1.0]).unwrap_err();
    assert!(matches!(err, ConfigurationError::ValueLength { .. }));

    // Connected inputs belong to their source output
    let err = prob.set_val("b.x", &[1.0, 2.0]).unwrap_err();
    assert!(matches!(err, ConfigurationError::NotSettable(path) if path == "b.x"));

    // Unconnected inputs are free
    prob.set_val("a.x", &[1.0, 2.0]).unwrap();
}

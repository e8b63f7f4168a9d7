//! Nonlinear solve behavior across hierarchy shapes: single-pass acyclic
//! evaluation, Gauss-Seidel and Newton on a cyclic coupling with a known
//! fixed point, and the non-convergence contract.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use platypus::{
    Communicator, FuncComp, GaussSeidelOptions, IndepVar, Model, NonlinearSolver, Problem,
    SolveError, Termination,
};

/// `a.y = 2x` and `b.x = y/4 - 3` wired in a cycle.
///
/// The composed sweep contracts with factor 1/2 toward the fixed point
/// `x = -6, y = -12`.
fn coupled_pair(nonlinear: NonlinearSolver) -> Problem {
    let mut model = Model::new();
    let root = model.root();
    model
        .add_explicit(
            root,
            "a",
            FuncComp::new(|i, o| {
                o.set_scalar("y", 2.0 * i.scalar("x"));
                Ok(())
            })
            .input_scalar("x", 0.0)
            .output_scalar("y"),
        )
        .unwrap();
    model
        .add_explicit(
            root,
            "b",
            FuncComp::new(|i, o| {
                o.set_scalar("x", i.scalar("y") / 4.0 - 3.0);
                Ok(())
            })
            .input_scalar("y", 0.0)
            .output_scalar("x"),
        )
        .unwrap();
    model.connect("a.y", "b.y");
    model.connect("b.x", "a.x");
    model.set_nonlinear_solver(root, nonlinear);

    let mut prob = Problem::new(model);
    prob.setup().unwrap();
    prob
}

/// `a.y = 3x` and `b.x = y` has no contraction; the sweep diverges.
fn diverging_pair(max_iter: usize, err_on_non_converge: bool) -> Problem {
    let mut model = Model::new();
    let root = model.root();
    model
        .add_explicit(
            root,
            "a",
            FuncComp::new(|i, o| {
                o.set_scalar("y", 3.0 * i.scalar("x"));
                Ok(())
            })
            .input_scalar("x", 1.0)
            .output_scalar("y"),
        )
        .unwrap();
    model
        .add_explicit(
            root,
            "b",
            FuncComp::new(|i, o| {
                o.set_scalar("x", i.scalar("y"));
                Ok(())
            })
            .input_scalar("y", 0.0)
            .output_scalar("x"),
        )
        .unwrap();
    model.connect("a.y", "b.y");
    model.connect("b.x", "a.x");

    let mut opts = GaussSeidelOptions::default();
    opts.solver.max_iter = max_iter;
    opts.solver.err_on_non_converge = err_on_non_converge;
    model.set_nonlinear_solver(root, NonlinearSolver::GaussSeidel(opts));

    let mut prob = Problem::new(model);
    prob.setup().unwrap();
    // State zero is the (unstable) fixed point; start the sweep off it
    prob.set_scalar("b.x", 1.0).unwrap();
    prob
}

#[test]
fn acyclic_chain_is_one_pass() {
    let mut model = Model::new();
    let root = model.root();
    model
        .add_explicit(root, "p", IndepVar::new().add_scalar("x", 1.5))
        .unwrap();
    model
        .add_explicit(
            root,
            "f",
            FuncComp::new(|i, o| {
                o.set_scalar("y", i.scalar("x").sin());
                Ok(())
            })
            .input_scalar("x", 0.0)
            .output_scalar("y"),
        )
        .unwrap();
    model
        .add_explicit(
            root,
            "g",
            FuncComp::new(|i, o| {
                o.set_scalar("z", i.scalar("y") * i.scalar("y") + 1.0);
                Ok(())
            })
            .input_scalar("y", 0.0)
            .output_scalar("z"),
        )
        .unwrap();
    model.connect("p.x", "f.x");
    model.connect("f.y", "g.y");

    let mut prob = Problem::new(model);
    prob.setup().unwrap();
    let report = prob.run_model().unwrap();

    // No cycle, no implicit state: one ordered pass with no residual loop
    assert!(report.converged);
    assert_eq!(report.iterations, 0);
    assert_eq!(report.termination, Termination::SinglePass);

    // Same result as evaluating the chain by hand
    let y = 1.5f64.sin();
    assert!((prob.get_scalar("f.y").unwrap() - y).abs() < 1e-15);
    assert!((prob.get_scalar("g.z").unwrap() - (y * y + 1.0)).abs() < 1e-15);
}

#[test]
fn execution_order_is_deterministic() {
    let build = || {
        let mut model = Model::new();
        let root = model.root();
        // Insert in reverse data-flow order; the topological sort must fix it
        let g = model
            .add_explicit(
                root,
                "g",
                FuncComp::new(|i, o| {
                    o.set_scalar("z", i.scalar("y") + 1.0);
                    Ok(())
                })
                .input_scalar("y", 0.0)
                .output_scalar("z"),
            )
            .unwrap();
        let f = model
            .add_explicit(
                root,
                "f",
                FuncComp::new(|i, o| {
                    o.set_scalar("y", 2.0 * i.scalar("x"));
                    Ok(())
                })
                .input_scalar("x", 0.0)
                .output_scalar("y"),
            )
            .unwrap();
        let p = model
            .add_explicit(root, "p", IndepVar::new().add_scalar("x", 1.0))
            .unwrap();
        model.connect("p.x", "f.x");
        model.connect("f.y", "g.y");
        model.setup().unwrap();
        (model.execution_order(root), p, f, g)
    };

    let (order1, p, f, g) = build();
    assert_eq!(order1, vec![vec![p], vec![f], vec![g]]);
    let (order2, ..) = build();
    assert_eq!(order1, order2);
}

#[test]
fn cycle_collapses_to_one_execution_entry() {
    let prob = coupled_pair(NonlinearSolver::gauss_seidel());
    let root = prob.model().root();
    let order = prob.model().execution_order(root);
    assert_eq!(order.len(), 1);
    assert_eq!(order[0].len(), 2);
}

#[test]
fn gauss_seidel_reaches_fixed_point() {
    let mut prob = coupled_pair(NonlinearSolver::gauss_seidel());
    let report = prob.run_model().unwrap();

    assert!(report.converged, "report: {report:?}");
    assert!(report.iterations > 0);
    assert!(report.iterations <= 50);
    assert!((prob.get_scalar("b.x").unwrap() - -6.0).abs() < 1e-8);
    assert!((prob.get_scalar("a.y").unwrap() - -12.0).abs() < 1e-8);
}

#[test]
fn newton_reaches_fixed_point_in_fewer_iterations() {
    let mut gs = coupled_pair(NonlinearSolver::gauss_seidel());
    let gs_report = gs.run_model().unwrap();

    let mut newton = coupled_pair(NonlinearSolver::newton());
    let newton_report = newton.run_model().unwrap();

    assert!(newton_report.converged, "report: {newton_report:?}");
    assert!((newton.get_scalar("b.x").unwrap() - -6.0).abs() < 1e-8);
    assert!((newton.get_scalar("a.y").unwrap() - -12.0).abs() < 1e-8);

    // The coupling is linear and well conditioned; Newton must not need
    // more iterations than the contracting sweep
    assert!(
        newton_report.iterations <= gs_report.iterations,
        "newton {} vs gauss-seidel {}",
        newton_report.iterations,
        gs_report.iterations
    );
}

#[test]
fn aitken_relaxation_still_converges() {
    let mut opts = GaussSeidelOptions::default();
    opts.use_aitken = true;
    let mut prob = coupled_pair(NonlinearSolver::GaussSeidel(opts));
    let report = prob.run_model().unwrap();

    assert!(report.converged);
    assert!((prob.get_scalar("b.x").unwrap() - -6.0).abs() < 1e-8);
    assert!((prob.get_scalar("a.y").unwrap() - -12.0).abs() < 1e-8);
}

#[test]
fn divergence_raises_when_fatal() {
    let mut prob = diverging_pair(5, true);
    let err = prob.run_model().unwrap_err();
    match err {
        SolveError::Convergence {
            system, iterations, ..
        } => {
            assert_eq!(system, "root");
            assert_eq!(iterations, 5);
        }
        other => panic!("expected Convergence, got {other:?}"),
    }
}

#[test]
fn divergence_reports_when_not_fatal() {
    let mut prob = diverging_pair(5, false);
    let report = prob.run_model().unwrap();

    assert!(!report.converged);
    assert_eq!(report.iterations, 5);
    assert_eq!(report.termination, Termination::MaxIterations);

    // The last iterate stays in place for inspection
    let x = prob.get_scalar("b.x").unwrap();
    assert!(x.is_finite());
    assert!(x.abs() > 1.0, "diverging iterate should have grown, got {x}");
}

#[test]
fn nested_group_solves_with_its_own_solver() {
    let mut model = Model::new();
    let root = model.root();
    let inner = model.add_group(root, "loop").unwrap();
    model
        .add_explicit(
            inner,
            "a",
            FuncComp::new(|i, o| {
                o.set_scalar("y", 2.0 * i.scalar("x"));
                Ok(())
            })
            .input_scalar("x", 0.0)
            .output_scalar("y"),
        )
        .unwrap();
    model
        .add_explicit(
            inner,
            "b",
            FuncComp::new(|i, o| {
                o.set_scalar("x", i.scalar("y") / 4.0 - 3.0);
                Ok(())
            })
            .input_scalar("y", 0.0)
            .output_scalar("x"),
        )
        .unwrap();
    model
        .add_explicit(
            root,
            "post",
            FuncComp::new(|i, o| {
                o.set_scalar("w", i.scalar("y") + 100.0);
                Ok(())
            })
            .input_scalar("y", 0.0)
            .output_scalar("w"),
        )
        .unwrap();
    model.connect("loop.a.y", "loop.b.y");
    model.connect("loop.b.x", "loop.a.x");
    model.connect("loop.a.y", "post.y");
    // The cycle lives inside `loop`; the root stays single-pass
    model.set_nonlinear_solver(inner, NonlinearSolver::gauss_seidel());

    let mut prob = Problem::new(model);
    prob.setup().unwrap();
    let report = prob.run_model().unwrap();

    assert!(report.converged);
    assert!(report.iterations > 0, "the inner loop iterations surface in the report");
    assert!((prob.get_scalar("loop.a.y").unwrap() - -12.0).abs() < 1e-8);
    assert!((prob.get_scalar("post.w").unwrap() - 88.0).abs() < 1e-8);
}

#[test]
fn residuals_vanish_at_convergence() {
    let mut prob = coupled_pair(NonlinearSolver::newton());
    prob.run_model().unwrap();
    let r = prob.get_residuals("a.y").unwrap();
    assert!(r[0].abs() < 1e-8, "residual {r:?}");
}

/// Single-rank communicator that counts its reductions.
struct CountingComm {
    reductions: Arc<AtomicUsize>,
}

impl Communicator for CountingComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn allreduce_sum(&self, _buf: &mut [f64]) {
        self.reductions.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn residual_norms_go_through_the_injected_communicator() {
    let mut model = Model::new();
    let root = model.root();
    model
        .add_explicit(
            root,
            "a",
            FuncComp::new(|i, o| {
                o.set_scalar("y", 2.0 * i.scalar("x"));
                Ok(())
            })
            .input_scalar("x", 0.0)
            .output_scalar("y"),
        )
        .unwrap();
    model
        .add_explicit(
            root,
            "b",
            FuncComp::new(|i, o| {
                o.set_scalar("x", i.scalar("y") / 4.0 - 3.0);
                Ok(())
            })
            .input_scalar("y", 0.0)
            .output_scalar("x"),
        )
        .unwrap();
    model.connect("a.y", "b.y");
    model.connect("b.x", "a.x");
    model.set_nonlinear_solver(root, NonlinearSolver::gauss_seidel());

    let reductions = Arc::new(AtomicUsize::new(0));
    let mut prob = Problem::with_comm(
        model,
        Box::new(CountingComm {
            reductions: Arc::clone(&reductions),
        }),
    );
    prob.setup().unwrap();
    let report = prob.run_model().unwrap();

    assert!(report.converged);
    // Every sweep agrees on its norm collectively: one reduction per iteration
    assert_eq!(reductions.load(Ordering::Relaxed), report.iterations);
}

#[test]
fn repeated_runs_are_reproducible() {
    let mut prob = coupled_pair(NonlinearSolver::gauss_seidel());
    let first = prob.run_model().unwrap();
    let x1 = prob.get_scalar("b.x").unwrap();
    let second = prob.run_model().unwrap();
    let x2 = prob.get_scalar("b.x").unwrap();

    assert_eq!(first.converged, second.converged);
    assert_eq!(x1, x2);
}

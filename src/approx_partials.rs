//! Finite-difference and complex-step partial approximation.
//!
//! Stateless kernels over a sparsity pattern: one evaluation per color
//! group, with entries recovered directly from the pattern. Forward
//! differences have O(h) truncation error, central O(h²); the complex step
//! has no subtractive cancellation and is exact to working precision for
//! functions that are analytic over the complex plane.

use num_complex::Complex64;

use crate::coloring::SparsityPattern;
use crate::error::ComponentError;

/// Finite-difference form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FdForm {
    /// `(f(x+h) - f(x)) / h`, one extra evaluation per color, O(h) error.
    Forward,
    /// `(f(x+h) - f(x-h)) / 2h`, two evaluations per color, O(h²) error.
    Central,
}

/// How a declared partial block is obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DerivMethod {
    /// Supplied by the component's partials routine.
    Analytic,
    /// Finite-difference perturbation of each (colored group of) column(s).
    Fd { form: FdForm, step: f64 },
    /// Complex-step perturbation; requires the component's complex path.
    ComplexStep { step: f64 },
}

impl DerivMethod {
    /// Forward finite differences with the default step.
    pub fn fd() -> Self {
        DerivMethod::Fd {
            form: FdForm::Forward,
            step: 1e-6,
        }
    }

    /// Central finite differences with the default step.
    pub fn central() -> Self {
        DerivMethod::Fd {
            form: FdForm::Central,
            step: 1e-6,
        }
    }

    /// Complex step with the default step.
    pub fn complex_step() -> Self {
        DerivMethod::ComplexStep { step: 1e-30 }
    }
}

/// Approximate Jacobian entries by colored finite differences.
///
/// `eval` maps a full perturbable vector to the outputs; `x` is the base
/// point, `y0` the outputs at `x`. Entries of `values` aligned with
/// `pattern` are overwritten for every column; entries outside the pattern
/// are untouched.
pub(crate) fn fd_jacobian(
    mut eval: impl FnMut(&[f64], &mut [f64]) -> Result<(), ComponentError>,
    x: &[f64],
    y0: &[f64],
    form: FdForm,
    step: f64,
    pattern: &SparsityPattern,
    colors: &[u32],
    num_colors: u32,
    values: &mut [f64],
) -> Result<(), ComponentError> {
    debug_assert_eq!(x.len(), pattern.ncols);
    debug_assert_eq!(y0.len(), pattern.nrows);
    debug_assert_eq!(values.len(), pattern.nnz());

    let mut xp = x.to_vec();
    let mut yp = vec![0.0; pattern.nrows];
    let mut ym = vec![0.0; pattern.nrows];

    for color in 0..num_colors {
        for j in 0..x.len() {
            xp[j] = if colors[j] == color { x[j] + step } else { x[j] };
        }
        eval(&xp, &mut yp)?;

        match form {
            FdForm::Forward => {
                for (k, (&r, &c)) in pattern.rows.iter().zip(pattern.cols.iter()).enumerate() {
                    if colors[c as usize] == color {
                        values[k] = (yp[r as usize] - y0[r as usize]) / step;
                    }
                }
            }
            FdForm::Central => {
                for j in 0..x.len() {
                    xp[j] = if colors[j] == color { x[j] - step } else { x[j] };
                }
                eval(&xp, &mut ym)?;
                for (k, (&r, &c)) in pattern.rows.iter().zip(pattern.cols.iter()).enumerate() {
                    if colors[c as usize] == color {
                        values[k] = (yp[r as usize] - ym[r as usize]) / (2.0 * step);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Approximate Jacobian entries by the colored complex step.
///
/// Perturbs each color group along the imaginary axis and reads the scaled
/// imaginary part of the outputs.
pub(crate) fn complex_step_jacobian(
    mut eval: impl FnMut(&[Complex64], &mut [Complex64]) -> Result<(), ComponentError>,
    x: &[f64],
    step: f64,
    pattern: &SparsityPattern,
    colors: &[u32],
    num_colors: u32,
    values: &mut [f64],
) -> Result<(), ComponentError> {
    debug_assert_eq!(x.len(), pattern.ncols);
    debug_assert_eq!(values.len(), pattern.nnz());

    let mut xp: Vec<Complex64> = x.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    let mut yp = vec![Complex64::new(0.0, 0.0); pattern.nrows];

    for color in 0..num_colors {
        for j in 0..x.len() {
            let im = if colors[j] == color { step } else { 0.0 };
            xp[j] = Complex64::new(x[j], im);
        }
        eval(&xp, &mut yp)?;

        for (k, (&r, &c)) in pattern.rows.iter().zip(pattern.cols.iter()).enumerate() {
            if colors[c as usize] == color {
                values[k] = yp[r as usize].im / step;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coloring::column_coloring;
    use approx::assert_relative_eq;

    /// y0 = x0^2, y1 = x1 * x2, y2 = sin(x2)
    fn eval(x: &[f64], y: &mut [f64]) -> Result<(), ComponentError> {
        y[0] = x[0] * x[0];
        y[1] = x[1] * x[2];
        y[2] = x[2].sin();
        Ok(())
    }

    fn eval_c(x: &[Complex64], y: &mut [Complex64]) -> Result<(), ComponentError> {
        y[0] = x[0] * x[0];
        y[1] = x[1] * x[2];
        y[2] = x[2].sin();
        Ok(())
    }

    fn pattern() -> SparsityPattern {
        SparsityPattern::from_entries(3, 3, vec![(0, 0), (1, 1), (1, 2), (2, 2)])
    }

    #[test]
    fn forward_fd_matches_analytic() {
        let x = [1.5, 2.0, 0.5];
        let mut y0 = [0.0; 3];
        eval(&x, &mut y0).unwrap();

        let pattern = pattern();
        let (colors, num_colors) = column_coloring(&pattern);
        let mut values = vec![0.0; pattern.nnz()];
        fd_jacobian(
            eval,
            &x,
            &y0,
            FdForm::Forward,
            1e-7,
            &pattern,
            &colors,
            num_colors,
            &mut values,
        )
        .unwrap();

        // Entries in (row, col) order: (0,0)=2*x0, (1,1)=x2, (1,2)=x1, (2,2)=cos(x2)
        assert_relative_eq!(values[0], 3.0, max_relative = 1e-5);
        assert_relative_eq!(values[1], 0.5, max_relative = 1e-5);
        assert_relative_eq!(values[2], 2.0, max_relative = 1e-5);
        assert_relative_eq!(values[3], 0.5f64.cos(), max_relative = 1e-5);
    }

    #[test]
    fn central_fd_is_more_accurate_than_forward() {
        let x = [1.5, 2.0, 0.5];
        let mut y0 = [0.0; 3];
        eval(&x, &mut y0).unwrap();

        let pattern = pattern();
        let (colors, num_colors) = column_coloring(&pattern);
        let h = 1e-4;

        let mut fwd = vec![0.0; pattern.nnz()];
        let mut ctr = vec![0.0; pattern.nnz()];
        fd_jacobian(eval, &x, &y0, FdForm::Forward, h, &pattern, &colors, num_colors, &mut fwd)
            .unwrap();
        fd_jacobian(eval, &x, &y0, FdForm::Central, h, &pattern, &colors, num_colors, &mut ctr)
            .unwrap();

        // d y0 / d x0 = 3.0 exactly
        let err_fwd = (fwd[0] - 3.0).abs();
        let err_ctr = (ctr[0] - 3.0).abs();
        assert!(err_ctr < err_fwd);
    }

    #[test]
    fn complex_step_is_exact_to_working_precision() {
        let x = [1.5, 2.0, 0.5];
        let pattern = pattern();
        let (colors, num_colors) = column_coloring(&pattern);
        let mut values = vec![0.0; pattern.nnz()];
        complex_step_jacobian(eval_c, &x, 1e-30, &pattern, &colors, num_colors, &mut values)
            .unwrap();

        assert_relative_eq!(values[0], 3.0, max_relative = 1e-14);
        assert_relative_eq!(values[1], 0.5, max_relative = 1e-14);
        assert_relative_eq!(values[2], 2.0, max_relative = 1e-14);
        assert_relative_eq!(values[3], 0.5f64.cos(), max_relative = 1e-14);
    }

    #[test]
    fn colored_matches_one_column_at_a_time() {
        let x = [1.5, 2.0, 0.5];
        let mut y0 = [0.0; 3];
        eval(&x, &mut y0).unwrap();
        let pattern = pattern();

        // Colored
        let (colors, num_colors) = column_coloring(&pattern);
        let mut colored = vec![0.0; pattern.nnz()];
        fd_jacobian(
            eval,
            &x,
            &y0,
            FdForm::Forward,
            1e-7,
            &pattern,
            &colors,
            num_colors,
            &mut colored,
        )
        .unwrap();

        // One column per "color"
        let one_per: Vec<u32> = (0..3).collect();
        let mut single = vec![0.0; pattern.nnz()];
        fd_jacobian(
            eval,
            &x,
            &y0,
            FdForm::Forward,
            1e-7,
            &pattern,
            &one_per,
            3,
            &mut single,
        )
        .unwrap();

        for (a, b) in colored.iter().zip(single.iter()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
    }
}

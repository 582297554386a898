//! Compressed sparse row storage and a Jacobi-preconditioned conjugate
//! gradient solver for symmetric positive definite systems.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Configuration for the PCG solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseSolverConfig {
    /// Maximum number of PCG iterations per time step.
    pub max_iterations: usize,
    /// Relative residual tolerance.
    pub rel_tolerance: f64,
    /// Absolute residual tolerance.
    pub abs_tolerance: f64,
}

impl Default for SparseSolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            rel_tolerance: 1e-9,
            abs_tolerance: 1e-12,
        }
    }
}

/// Square sparse matrix in CSR form with sorted column indices per row.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    n: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Zero matrix with the given pattern. `pattern[i]` lists the columns of
    /// row `i` and must be sorted and free of duplicates.
    pub fn from_pattern(pattern: &[Vec<usize>]) -> Self {
        let n = pattern.len();
        let mut row_ptr = Vec::with_capacity(n + 1);
        let mut col_idx = Vec::new();
        row_ptr.push(0);
        for row in pattern {
            col_idx.extend_from_slice(row);
            row_ptr.push(col_idx.len());
        }
        let nnz = col_idx.len();
        Self {
            n,
            row_ptr,
            col_idx,
            values: vec![0.0; nnz],
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    fn position(&self, row: usize, col: usize) -> Option<usize> {
        let (start, end) = (self.row_ptr[row], self.row_ptr[row + 1]);
        self.col_idx[start..end]
            .binary_search(&col)
            .ok()
            .map(|p| start + p)
    }

    /// Adds `value` to entry `(row, col)`, which must be in the pattern.
    ///
    /// Returns false if the entry is outside the pattern.
    pub fn add(&mut self, row: usize, col: usize, value: f64) -> bool {
        match self.position(row, col) {
            Some(p) => {
                self.values[p] += value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.position(row, col).map_or(0.0, |p| self.values[p])
    }

    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.n).map(|i| self.get(i, i)).collect()
    }

    /// Computes `y = (A + diag(shift)) x`.
    ///
    /// Rows are processed in parallel; each row sums in column order.
    pub fn apply_shifted(&self, shift: &[f64], x: &[f64], y: &mut [f64]) {
        y.par_iter_mut().enumerate().for_each(|(i, yi)| {
            let mut sum = shift[i] * x[i];
            for p in self.row_ptr[i]..self.row_ptr[i + 1] {
                sum += self.values[p] * x[self.col_idx[p]];
            }
            *yi = sum;
        });
    }

    /// Computes `y = A x`.
    pub fn apply(&self, x: &[f64], y: &mut [f64]) {
        self.apply_shifted(&vec![0.0; self.n], x, y);
    }
}

/// Outcome of a PCG solve that did not break down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PcgReport {
    pub iterations: usize,
    /// Final residual norm relative to the right-hand side norm.
    pub relative_residual: f64,
    pub converged: bool,
}

/// Reasons a PCG solve cannot produce an answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PcgFailure {
    /// `p^T A p <= 0`: the matrix is not positive definite.
    Breakdown { iteration: usize },
    /// A residual or iterate became NaN or infinite.
    NonFinite { iteration: usize },
}

impl std::fmt::Display for PcgFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PcgFailure::Breakdown { iteration } => {
                write!(f, "conjugate gradient breakdown at iteration {iteration}")
            }
            PcgFailure::NonFinite { iteration } => {
                write!(f, "non-finite residual at iteration {iteration}")
            }
        }
    }
}

/// Solves `(A + diag(shift)) x = b` in place, starting from the given `x`.
pub fn pcg_solve(
    matrix: &CsrMatrix,
    shift: &[f64],
    b: &[f64],
    x: &mut [f64],
    config: SparseSolverConfig,
) -> Result<PcgReport, PcgFailure> {
    let n = b.len();
    if n == 0 {
        return Ok(PcgReport {
            iterations: 0,
            relative_residual: 0.0,
            converged: true,
        });
    }

    let inv_diag: Vec<f64> = matrix
        .diagonal()
        .iter()
        .zip(shift)
        .map(|(d, s)| {
            let d = d + s;
            if d.abs() > 1e-30 { 1.0 / d } else { 1.0 }
        })
        .collect();

    let mut ax = vec![0.0; n];
    matrix.apply_shifted(shift, x, &mut ax);
    let mut r: Vec<f64> = b.iter().zip(&ax).map(|(bi, ai)| bi - ai).collect();

    let b_norm = l2_norm(b).max(1.0);
    let tol = config.abs_tolerance.max(config.rel_tolerance * b_norm);
    let report = |iterations: usize, r_norm: f64| PcgReport {
        iterations,
        relative_residual: r_norm / b_norm,
        converged: r_norm <= tol,
    };

    let mut r_norm = l2_norm(&r);
    if !r_norm.is_finite() {
        return Err(PcgFailure::NonFinite { iteration: 0 });
    }
    if r_norm <= tol {
        return Ok(report(0, r_norm));
    }

    let mut z: Vec<f64> = r.iter().zip(&inv_diag).map(|(ri, di)| ri * di).collect();
    let mut p = z.clone();
    let mut rz_old = dot(&r, &z);
    let mut ap = vec![0.0; n];

    for it in 1..=config.max_iterations {
        matrix.apply_shifted(shift, &p, &mut ap);
        let denom = dot(&p, &ap);
        if !denom.is_finite() {
            return Err(PcgFailure::NonFinite { iteration: it });
        }
        if denom <= 0.0 {
            return Err(PcgFailure::Breakdown { iteration: it });
        }

        let alpha = rz_old / denom;
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }

        r_norm = l2_norm(&r);
        if !r_norm.is_finite() {
            return Err(PcgFailure::NonFinite { iteration: it });
        }
        if r_norm <= tol {
            return Ok(report(it, r_norm));
        }

        for i in 0..n {
            z[i] = r[i] * inv_diag[i];
        }
        let rz_new = dot(&r, &z);
        if rz_old.abs() < 1e-300 {
            return Ok(report(it, r_norm));
        }
        let beta = rz_new / rz_old;
        for i in 0..n {
            p[i] = z[i] + beta * p[i];
        }
        rz_old = rz_new;
    }

    Ok(report(config.max_iterations, r_norm))
}

/// Sequential dot product, so results do not depend on thread count.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 1D Laplacian with Dirichlet ends folded into the diagonal.
    fn laplacian(n: usize) -> CsrMatrix {
        let pattern: Vec<Vec<usize>> = (0..n)
            .map(|i| {
                let lo = i.saturating_sub(1);
                let hi = (i + 1).min(n - 1);
                (lo..=hi).collect()
            })
            .collect();
        let mut a = CsrMatrix::from_pattern(&pattern);
        for i in 0..n {
            a.add(i, i, 2.0);
            if i > 0 {
                a.add(i, i - 1, -1.0);
            }
            if i + 1 < n {
                a.add(i, i + 1, -1.0);
            }
        }
        a
    }

    #[test]
    fn test_pattern_and_entries() {
        let mut a = laplacian(4);
        assert_eq!(a.size(), 4);
        assert_eq!(a.nnz(), 10);
        assert_eq!(a.get(1, 2), -1.0);
        assert_eq!(a.get(0, 3), 0.0);
        assert!(!a.add(0, 3, 1.0));
        assert_eq!(a.diagonal(), vec![2.0; 4]);
    }

    #[test]
    fn test_pcg_known_solution() {
        let n = 50;
        let a = laplacian(n);
        let shift = vec![0.5; n];
        let exact: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).sin() + 2.0).collect();
        let mut b = vec![0.0; n];
        a.apply_shifted(&shift, &exact, &mut b);

        let mut x = vec![0.0; n];
        let report = pcg_solve(&a, &shift, &b, &mut x, SparseSolverConfig::default()).unwrap();
        assert!(report.converged);
        assert!(report.iterations <= n);
        for (xi, ei) in x.iter().zip(&exact) {
            assert_relative_eq!(*xi, *ei, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_pcg_breakdown_on_indefinite_matrix() {
        let mut a = CsrMatrix::from_pattern(&[vec![0], vec![1]]);
        a.add(0, 0, 1.0);
        a.add(1, 1, -1.0);
        let mut x = vec![0.0, 0.0];
        let res = pcg_solve(&a, &[0.0, 0.0], &[1.0, 1.0], &mut x, SparseSolverConfig::default());
        assert!(matches!(res, Err(PcgFailure::Breakdown { .. })));
    }

    #[test]
    fn test_pcg_iteration_cap() {
        let n = 200;
        let a = laplacian(n);
        let b = vec![1.0; n];
        let mut x = vec![0.0; n];
        let config = SparseSolverConfig {
            max_iterations: 3,
            ..Default::default()
        };
        let report = pcg_solve(&a, &vec![0.0; n], &b, &mut x, config).unwrap();
        assert!(!report.converged);
        assert_eq!(report.iterations, 3);
        assert!(report.relative_residual > 1e-6);
    }
}

use nalgebra::{DMatrix, DVector};

use crate::error::Result;

pub type Real = f64;
pub type Vector = DVector<Real>;
pub type Matrix = DMatrix<Real>;

#[inline(always)]
pub fn to_vector(values: &[Real]) -> Vector {
    DVector::from_column_slice(values)
}

#[inline(always)]
pub fn identity_matrix(n: usize) -> Matrix {
    DMatrix::identity(n, n)
}

#[inline(always)]
pub fn max_abs(values: &[Real]) -> Real {
    values.iter().fold(0.0, |acc, v| acc.max(v.abs()))
}

#[inline(always)]
pub fn norm(values: &[Real]) -> Real {
    values.iter().map(|v| v * v).sum::<Real>().sqrt()
}

#[inline(always)]
pub fn all_finite(values: &[Real]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// `a + s·b`, component-wise.
#[inline(always)]
pub fn axpy(a: &[Real], s: Real, b: &[Real]) -> Vec<Real> {
    a.iter().zip(b).map(|(x, y)| x + s * y).collect()
}

/// Central-difference Jacobian of `f` at `x`; column `j` is `∂f/∂x_j`.
pub fn finite_difference_jacobian(
    f: &impl Fn(&[Real]) -> Result<Vec<Real>>,
    x: &[Real],
    step: Real,
) -> Result<Matrix> {
    let n = x.len();
    let mut jacobian = DMatrix::zeros(n, n);
    let mut probe = x.to_vec();
    for j in 0..n {
        probe[j] = x[j] + step;
        let plus = f(&probe)?;
        probe[j] = x[j] - step;
        let minus = f(&probe)?;
        probe[j] = x[j];
        for i in 0..n {
            jacobian[(i, j)] = (plus[i] - minus[i]) / (2.0 * step);
        }
    }
    Ok(jacobian)
}

/// Solve `m·d = rhs`; `None` when `m` is singular.
pub fn solve_linear(m: Matrix, rhs: &[Real]) -> Option<Vec<Real>> {
    m.lu()
        .solve(&to_vector(rhs))
        .map(|d| d.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_difference_jacobian() {
        let f = |x: &[Real]| -> Result<Vec<Real>> { Ok(vec![x[0] * x[1], x[0].sin()]) };
        let j = finite_difference_jacobian(&f, &[0.5, 2.0], 1e-5).unwrap();
        assert!((j[(0, 0)] - 2.0).abs() < 1e-8);
        assert!((j[(0, 1)] - 0.5).abs() < 1e-8);
        assert!((j[(1, 0)] - 0.5_f64.cos()).abs() < 1e-8);
        assert!(j[(1, 1)].abs() < 1e-8);
    }

    #[test]
    fn test_solve_linear() {
        let m = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let d = solve_linear(m, &[3.0, 5.0]).unwrap();
        assert!((d[0] - 0.8).abs() < 1e-12 && (d[1] - 1.4).abs() < 1e-12);
        assert!(solve_linear(DMatrix::zeros(2, 2), &[1.0, 1.0]).is_none());
    }
}

//! Symbolic inversion of small square matrices by cofactor expansion.

use crate::error::{FlowError, Result};
use crate::expr::Expr;

use super::simplify::simplify_fully;

pub type SymbolicMatrix = Vec<Vec<Expr>>;

/// `M⁻¹ = adj(M) / det(M)`, kept factored so the determinant can be emitted once.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixInverse {
    pub determinant: Expr,
    pub adjugate: SymbolicMatrix,
}

impl MatrixInverse {
    pub fn size(&self) -> usize {
        self.adjugate.len()
    }

    /// Entry `(i, j)` of the inverse as a single quotient.
    pub fn entry(&self, i: usize, j: usize) -> Expr {
        simplify_fully(&Expr::div(
            self.adjugate[i][j].clone(),
            self.determinant.clone(),
        ))
    }

    pub fn entries(&self) -> SymbolicMatrix {
        (0..self.size())
            .map(|i| (0..self.size()).map(|j| self.entry(i, j)).collect())
            .collect()
    }

    /// Total node count of determinant and adjugate, the size measure used to
    /// decide whether the symbolic form is worth emitting.
    pub fn node_count(&self) -> usize {
        self.determinant.node_count()
            + self
                .adjugate
                .iter()
                .flatten()
                .map(Expr::node_count)
                .sum::<usize>()
    }
}

pub fn invert(matrix: &[Vec<Expr>]) -> Result<MatrixInverse> {
    let size = matrix.len();
    if size == 0 || size > 4 {
        return Err(FlowError::MatrixInversion {
            size,
            message: "only 1x1 through 4x4 matrices are supported".to_string(),
        });
    }
    if matrix.iter().any(|row| row.len() != size) {
        return Err(FlowError::MatrixInversion {
            size,
            message: "matrix is not square".to_string(),
        });
    }

    let determinant = simplify_fully(&determinant(matrix));
    if determinant.is_number(0.0) {
        return Err(FlowError::MatrixInversion {
            size,
            message: "matrix is singular".to_string(),
        });
    }

    let adjugate = if size == 1 {
        vec![vec![Expr::num(1.0)]]
    } else {
        (0..size)
            .map(|i| {
                (0..size)
                    .map(|j| {
                        // adj(M)[i][j] is the (j, i) cofactor
                        let minor = determinant_of_minor(matrix, j, i);
                        let signed = if (i + j) % 2 == 0 {
                            minor
                        } else {
                            Expr::neg(minor)
                        };
                        simplify_fully(&signed)
                    })
                    .collect()
            })
            .collect()
    };

    Ok(MatrixInverse {
        determinant,
        adjugate,
    })
}

fn determinant(matrix: &[Vec<Expr>]) -> Expr {
    match matrix.len() {
        0 => Expr::num(1.0),
        1 => matrix[0][0].clone(),
        2 => Expr::sub(
            Expr::mul(matrix[0][0].clone(), matrix[1][1].clone()),
            Expr::mul(matrix[0][1].clone(), matrix[1][0].clone()),
        ),
        n => {
            let mut terms = Vec::with_capacity(n);
            for col in 0..n {
                let entry = &matrix[0][col];
                if entry.is_number(0.0) {
                    continue;
                }
                let term = Expr::mul(entry.clone(), determinant_of_minor(matrix, 0, col));
                terms.push((col % 2 == 1, term));
            }
            terms
                .into_iter()
                .fold(None, |acc: Option<Expr>, (negative, term)| {
                    Some(match (acc, negative) {
                        (None, false) => term,
                        (None, true) => Expr::neg(term),
                        (Some(acc), false) => Expr::add(acc, term),
                        (Some(acc), true) => Expr::sub(acc, term),
                    })
                })
                .unwrap_or(Expr::num(0.0))
        }
    }
}

fn determinant_of_minor(matrix: &[Vec<Expr>], skip_row: usize, skip_col: usize) -> Expr {
    let minor: SymbolicMatrix = matrix
        .iter()
        .enumerate()
        .filter(|(row, _)| *row != skip_row)
        .map(|(_, entries)| {
            entries
                .iter()
                .enumerate()
                .filter(|(col, _)| *col != skip_col)
                .map(|(_, entry)| entry.clone())
                .collect()
        })
        .collect();
    simplify_fully(&determinant(&minor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{eval, parse};

    fn matrix(rows: &[&[&str]]) -> SymbolicMatrix {
        rows.iter()
            .map(|row| row.iter().map(|e| parse(e).unwrap()).collect())
            .collect()
    }

    fn product_is_identity(m: &SymbolicMatrix, inverse: &MatrixInverse, scope: &[(&str, f64)]) {
        let n = m.len();
        let inv = inverse.entries();
        for i in 0..n {
            for j in 0..n {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += eval(&m[i][k], &scope).unwrap() * eval(&inv[k][j], &scope).unwrap();
                }
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((sum - expected).abs() < 1e-9, "({i}, {j}) = {sum}");
            }
        }
    }

    #[test]
    fn test_two_by_two() {
        let m = matrix(&[&["a", "b"], &["c", "d"]]);
        let inverse = invert(&m).unwrap();
        assert_eq!(inverse.determinant.to_string(), "a*d - b*c");
        product_is_identity(&m, &inverse, &[("a", 2.0), ("b", 1.0), ("c", 0.5), ("d", 3.0)]);
    }

    #[test]
    fn test_newton_matrix_four_by_four() {
        let m = matrix(&[
            &["1 - h*x", "h", "0", "0"],
            &["0", "1", "-h*y", "0"],
            &["h", "0", "1 + h", "h*x*y"],
            &["0", "0", "h", "1"],
        ]);
        let inverse = invert(&m).unwrap();
        assert!(inverse.node_count() > 0);
        product_is_identity(&m, &inverse, &[("h", 0.1), ("x", 0.7), ("y", -1.3)]);
    }

    #[test]
    fn test_scalar_and_failures() {
        let inverse = invert(&matrix(&[&["1 - h"]])).unwrap();
        assert_eq!(inverse.entry(0, 0).to_string(), "1/(1 - h)");
        let err = invert(&matrix(&[&["x", "x"], &["1", "1"]])).unwrap_err();
        assert_eq!(err.kind(), "matrix-inversion-failure");
        assert!(invert(&vec![vec![Expr::num(1.0); 5]; 5]).is_err());
    }
}

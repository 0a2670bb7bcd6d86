//! Polynomials over GF(256)
//!
//! Coefficients are stored constant term first. Polynomials built during a split hold
//! secret material, so the coefficient buffer is wiped on drop and `Debug` never
//! prints it.

use crate::gf256;
use keyhaven_core::{KeyhavenError, KeyhavenResult};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Polynomial with GF(256) coefficients
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Polynomial {
    coefficients: Vec<u8>,
}

impl Polynomial {
    /// Create from coefficients, constant term first
    pub fn new(coefficients: Vec<u8>) -> Self {
        Self { coefficients }
    }

    /// Coefficients, constant term first
    pub fn coefficients(&self) -> &[u8] {
        &self.coefficients
    }

    /// Degree of the highest non-zero coefficient; the zero polynomial has degree 0
    pub fn degree(&self) -> usize {
        self.coefficients
            .iter()
            .rposition(|&c| c != 0)
            .unwrap_or(0)
    }

    /// Evaluate at `x` with Horner's method
    pub fn evaluate(&self, x: u8) -> u8 {
        self.coefficients
            .iter()
            .rev()
            .fold(0u8, |acc, &c| gf256::add(gf256::mul(acc, x), c))
    }

    /// The unique polynomial of degree `< points.len()` through `points`
    ///
    /// Each Lagrange basis polynomial is built one linear factor at a time and added in
    /// scaled by its y value. Repeated x values make a basis denominator zero and fail
    /// with [`KeyhavenError::DivisionByZero`].
    pub fn interpolate(points: &[(u8, u8)]) -> KeyhavenResult<Self> {
        if points.is_empty() {
            return Err(KeyhavenError::invalid("interpolation needs at least one point"));
        }
        let mut result = vec![0u8; points.len()];
        for (i, &(xi, yi)) in points.iter().enumerate() {
            let mut basis = Polynomial::new(vec![1u8]);
            for (j, &(xj, _)) in points.iter().enumerate() {
                if i == j {
                    continue;
                }
                let scale = gf256::inv(gf256::sub(xi, xj))?;
                basis = basis.mul_linear(xj, scale);
            }
            for (r, &b) in result.iter_mut().zip(basis.coefficients.iter()) {
                *r = gf256::add(*r, gf256::mul(b, yi));
            }
        }
        Ok(Self::new(result))
    }

    /// `self * (x - root) * scale`
    fn mul_linear(&self, root: u8, scale: u8) -> Polynomial {
        let mut out = vec![0u8; self.coefficients.len() + 1];
        for (k, &c) in self.coefficients.iter().enumerate() {
            let c = gf256::mul(c, scale);
            out[k + 1] = gf256::add(out[k + 1], c);
            out[k] = gf256::add(out[k], gf256::mul(c, root));
        }
        Polynomial::new(out)
    }
}

impl fmt::Debug for Polynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Polynomial")
            .field("len", &self.coefficients.len())
            .finish_non_exhaustive()
    }
}

/// Value at `x = 0` of each Lagrange basis polynomial for the given x coordinates
///
/// `basis[i] = prod_{j != i} x_j / (x_i - x_j)`. Computing these once lets a caller
/// recover many secret bytes that share the same x coordinates.
pub fn lagrange_basis_at_zero(xs: &[u8]) -> KeyhavenResult<Vec<u8>> {
    if xs.is_empty() {
        return Err(KeyhavenError::invalid("interpolation needs at least one point"));
    }
    xs.iter()
        .enumerate()
        .map(|(i, &xi)| {
            let mut numerator = 1u8;
            let mut denominator = 1u8;
            for (j, &xj) in xs.iter().enumerate() {
                if i != j {
                    numerator = gf256::mul(numerator, xj);
                    denominator = gf256::mul(denominator, gf256::sub(xi, xj));
                }
            }
            gf256::div(numerator, denominator)
        })
        .collect()
}

/// Value at `x = 0` of the polynomial through `points`
pub fn interpolate_at_zero(points: &[(u8, u8)]) -> KeyhavenResult<u8> {
    let xs: Vec<u8> = points.iter().map(|&(x, _)| x).collect();
    let basis = lagrange_basis_at_zero(&xs)?;
    Ok(points
        .iter()
        .zip(basis)
        .fold(0u8, |acc, (&(_, y), l)| gf256::add(acc, gf256::mul(y, l))))
}

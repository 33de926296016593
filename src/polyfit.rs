use ndarray::Array1;
use ndarray_linalg::LeastSquaresSvd;

use crate::math::vandermonde;
use crate::{Error, Result};

/// Least squares polynomial coefficients for `y ~ x`, lowest power first
///
/// # Errors
/// Returns an error if `x` and `y` differ in length, if there are fewer observations than
/// coefficients, or if the least squares solve fails.
///
/// # Examples
///
/// ```
/// use electrochem::polyfit::polyfit;
///
/// let x = [0., 1., 2., 3.];
/// let y = [1., 3., 9., 19.];
/// let coeffs = polyfit(&x, &y, 2).unwrap();
///
/// approx::assert_relative_eq!(coeffs[0], 1., epsilon = 1e-10);
/// approx::assert_relative_eq!(coeffs[1], 0., epsilon = 1e-10);
/// approx::assert_relative_eq!(coeffs[2], 2., epsilon = 1e-10);
/// ```
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Result<Array1<f64>> {
    if x.len() != y.len() {
        return Err(Error::invalid(format!(
            "polynomial fit needs paired observations, got {} and {}",
            x.len(),
            y.len()
        )));
    }
    if x.len() <= degree {
        return Err(Error::InsufficientData {
            required: degree + 1,
            available: x.len(),
        });
    }

    let design = vandermonde(x, degree)?;
    let rhs = Array1::from_iter(y.iter().copied());
    let result = design.least_squares(&rhs)?;

    Ok(result.solution)
}

/// Evaluate a polynomial with coefficients ordered lowest power first
pub fn polyval(coeffs: &Array1<f64>, x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc.mul_add(x, c))
}

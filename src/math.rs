use ndarray::{Array, Array2};
use ndarray_linalg::Scalar;
use num_traits::Float;

use crate::polyfit::polyfit;
use crate::Result;

/// Generate the Vandermode matrix of `degree` for observations `x`
///
/// The Vandermonde matrix is a (n x degree + 1) matrix. Each row of the matrix is a geometric
/// progression for an individual observation `x` from power `0` to `degree` inclusive.
///
/// # Examples
///
/// ```
/// use electrochem::math::vandermonde;
/// use ndarray::arr2;
///
/// let observations: Vec<f64> = vec![2., 3.];
/// let vander = vandermonde(&observations, 2).unwrap();
///
/// let expected = arr2(&[[1., 2., 4.], [1., 3., 9.]]);
/// assert_eq!(vander, expected);
/// ```
pub fn vandermonde<T: Copy + Scalar>(x: &[T], degree: usize) -> Result<Array2<T>> {
    let vals = x.iter().flat_map(|&xi| {
        std::iter::successors(Some(T::one()), move |&power| Some(power * xi)).take(degree + 1)
    });

    Ok(Array::from_iter(vals).into_shape((x.len(), degree + 1))?)
}

/// Ordinary least squares straight line through a set of points
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination
    pub r_squared: f64,
    pub mean_squared_error: f64,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope.mul_add(x, self.intercept)
    }
}

/// Fit `y = slope * x + intercept` as a first degree [`polyfit`].
///
/// Returns `None` when fewer than two points are passed, when any value is non-finite or when `x`
/// has no spread. A constant `y` reproduced exactly has `r_squared` of one.
pub fn linear_fit(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return None;
    }

    let x_mean = mean(x);
    let y_mean = mean(y);

    // centred abscissa keeps the design matrix well conditioned
    let centred = x.iter().map(|xi| xi - x_mean).collect::<Vec<_>>();
    if centred.iter().all(|dx| *dx == 0.0) {
        return None;
    }
    let coeffs = polyfit(&centred, y, 1).ok()?;
    let slope = coeffs[1];
    let intercept = slope.mul_add(-x_mean, coeffs[0]);

    let (ss_res, ss_tot) = x
        .iter()
        .zip(y)
        .fold((0.0, 0.0), |(ss_res, ss_tot), (&xi, &yi)| {
            let residual = yi - slope.mul_add(xi, intercept);
            let deviation = yi - y_mean;
            (
                residual.mul_add(residual, ss_res),
                deviation.mul_add(deviation, ss_tot),
            )
        });

    let r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res > 0.0 {
        0.0
    } else {
        1.0
    };

    #[allow(clippy::cast_precision_loss)]
    let mean_squared_error = ss_res / x.len() as f64;

    let fit = LinearFit {
        slope,
        intercept,
        r_squared,
        mean_squared_error,
    };

    (slope.is_finite() && intercept.is_finite() && r_squared.is_finite()).then_some(fit)
}

/// Numerical derivative of `y` with respect to `x`
///
/// Interior points use second order accurate central differences on the possibly non-uniform
/// grid, the two boundaries use one-sided first differences. Repeated `x` values produce
/// non-finite entries which callers are expected to deal with.
pub fn gradient(y: &[f64], x: &[f64]) -> Vec<f64> {
    let n = y.len().min(x.len());
    if n < 2 {
        return vec![f64::NAN; n];
    }

    let mut grad = Vec::with_capacity(n);
    grad.push((y[1] - y[0]) / (x[1] - x[0]));
    for ii in 1..n - 1 {
        let hd = x[ii] - x[ii - 1];
        let hs = x[ii + 1] - x[ii];
        let numerator = (hs.mul_add(-hs, hd * hd)).mul_add(-y[ii], hd * hd * y[ii + 1])
            - hs * hs * y[ii - 1];
        grad.push(numerator / (hs * hd * (hd + hs)));
    }
    grad.push((y[n - 1] - y[n - 2]) / (x[n - 1] - x[n - 2]));
    grad
}

/// Running trapezoid integral of `y` over `x`, starting from zero at `x[0]`
pub fn cumulative_trapezoid(y: &[f64], x: &[f64]) -> Vec<f64> {
    let n = y.len().min(x.len());
    let mut integral = Vec::with_capacity(n);
    if n == 0 {
        return integral;
    }
    integral.push(0.0);
    for ii in 1..n {
        let area = 0.5 * (y[ii] + y[ii - 1]) * (x[ii] - x[ii - 1]);
        integral.push(integral[ii - 1] + area);
    }
    integral
}

/// Invert [`cumulative_trapezoid`] given the first integrand sample
pub fn differentiate_cumulative(integral: &[f64], x: &[f64], initial: f64) -> Vec<f64> {
    let n = integral.len().min(x.len());
    let mut y = Vec::with_capacity(n);
    if n == 0 {
        return y;
    }
    y.push(initial);
    for ii in 1..n {
        let step = x[ii] - x[ii - 1];
        y.push(2.0 * (integral[ii] - integral[ii - 1]) / step - y[ii - 1]);
    }
    y
}

pub fn mean<T: Float>(values: &[T]) -> T {
    if values.is_empty() {
        return T::nan();
    }
    let sum = values.iter().fold(T::zero(), |acc, &v| acc + v);
    sum / T::from(values.len()).unwrap_or_else(T::nan)
}

/// Population standard deviation
pub fn std_dev<T: Float>(values: &[T]) -> T {
    let centre = mean(values);
    let variance = values
        .iter()
        .map(|&v| (v - centre) * (v - centre))
        .fold(T::zero(), |acc, v| acc + v)
        / T::from(values.len()).unwrap_or_else(T::nan);
    variance.sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}

/// Replace non-finite values with the mean of the nearest finite neighbours
///
/// A gap with a finite value on one side only takes that value, a series with no finite values at
/// all is filled with zero.
pub fn impute_non_finite(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut previous = vec![None; n];
    let mut last = None;
    for (ii, &v) in values.iter().enumerate() {
        if v.is_finite() {
            last = Some(v);
        }
        previous[ii] = last;
    }

    let mut next = None;
    let mut imputed = vec![0.0; n];
    for ii in (0..n).rev() {
        let v = values[ii];
        if v.is_finite() {
            next = Some(v);
            imputed[ii] = v;
            continue;
        }
        imputed[ii] = match (previous[ii], next) {
            (Some(left), Some(right)) => 0.5 * (left + right),
            (Some(side), None) | (None, Some(side)) => side,
            (None, None) => 0.0,
        };
    }
    imputed
}

#[cfg(test)]
mod tests {
    use crate::polyfit::polyfit;
use crate::Result;

    use super::*;

    use itertools::Itertools;
    use ndarray_linalg::Determinant;
    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::isaac64::Isaac64Rng;

    #[test]
    fn vandermonde_matrices_are_generated_correctly() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let num_data_points = 10;
        let degree = 5;

        let data_points = (0..num_data_points)
            .map(|_| rng.gen())
            .collect::<Vec<f64>>();

        let vandermonde = vandermonde(&data_points, degree).unwrap();

        for (ii, data_point) in data_points.iter().enumerate() {
            for jj in 0..=degree {
                let expected = data_point.powi(i32::try_from(jj).unwrap());
                let actual = vandermonde[[ii, jj]];
                approx::assert_relative_eq!(expected, actual, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn determinant_of_square_vandermonde_matrix_equals_product_of_differences() -> Result<()> {
        let dim = 5;
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let data_points = (0..dim).map(|_| rng.gen()).collect::<Vec<f64>>();

        let vandermonde = vandermonde(&data_points, dim - 1)?;
        let determinant = vandermonde.det()?;

        let product_of_differences: f64 = data_points
            .iter()
            .tuple_combinations()
            .map(|(a, b)| b - a)
            .product();

        approx::assert_relative_eq!(determinant, product_of_differences, max_relative = 1e-8);
        Ok(())
    }

    #[test]
    fn exact_lines_are_fit_with_unit_r_squared() {
        let x = [0., 1., 2., 3., 4.];
        let y = x.iter().map(|x| 2.5 * x - 1.0).collect::<Vec<_>>();

        let fit = linear_fit(&x, &y).unwrap();

        approx::assert_relative_eq!(fit.slope, 2.5, max_relative = 1e-12);
        approx::assert_relative_eq!(fit.intercept, -1.0, max_relative = 1e-12);
        approx::assert_relative_eq!(fit.r_squared, 1.0, max_relative = 1e-12);
        approx::assert_abs_diff_eq!(fit.mean_squared_error, 0.0, epsilon = 1e-20);
    }

    #[test]
    fn lines_cannot_be_fit_through_degenerate_data() {
        assert!(linear_fit(&[1.0], &[2.0]).is_none());
        assert!(linear_fit(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(linear_fit(&[1.0, 2.0, 3.0], &[1.0, f64::NAN, 3.0]).is_none());
        assert!(linear_fit(&[1.0, 2.0, 3.0], &[1.0, f64::NEG_INFINITY, 3.0]).is_none());
    }

    #[test]
    fn gradient_is_exact_for_quadratics_on_uneven_grids() {
        let x = [0., 1., 3., 4.];
        let y = x.iter().map(|x| x * x).collect::<Vec<_>>();

        let grad = gradient(&y, &x);

        approx::assert_relative_eq!(grad[0], 1.0);
        approx::assert_relative_eq!(grad[1], 2.0, max_relative = 1e-12);
        approx::assert_relative_eq!(grad[2], 6.0, max_relative = 1e-12);
        approx::assert_relative_eq!(grad[3], 7.0);
    }

    #[test]
    fn cumulative_integral_is_inverted_by_differentiation() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let mut x = vec![0.0];
        for _ in 0..50 {
            let step: f64 = rng.gen_range(0.1..2.0);
            x.push(x[x.len() - 1] + step);
        }
        let y = x.iter().map(|_| rng.gen_range(-1.0..1.0)).collect::<Vec<f64>>();

        let integral = cumulative_trapezoid(&y, &x);
        approx::assert_abs_diff_eq!(integral[0], 0.0);

        let recovered = differentiate_cumulative(&integral, &x, y[0]);
        for (expected, actual) in y.iter().zip(recovered) {
            approx::assert_abs_diff_eq!(*expected, actual, epsilon = 1e-9);
        }
    }

    #[test]
    fn non_finite_values_take_the_mean_of_their_neighbours() {
        let values = [f64::NAN, 1.0, f64::NAN, f64::INFINITY, 3.0, f64::NAN];
        assert_eq!(impute_non_finite(&values), vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        assert_eq!(impute_non_finite(&[f64::NAN, f64::NAN]), vec![0.0, 0.0]);
    }

    #[test]
    fn medians_of_even_and_odd_series() {
        approx::assert_relative_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        approx::assert_relative_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        approx::assert_relative_eq!(std_dev(&[1.0, 1.0, 1.0]), 0.0);
    }
}

//! Search for the most linear stretch of a series.
//!
//! Electrochemical decay and rise curves are rarely linear over the whole trace, but usually are
//! over some sub-range. The helpers here slide a fixed-width window along the series and keep
//! the window whose straight-line fit has the highest coefficient of determination.

use crate::math::{linear_fit, LinearFit};
use crate::{Error, Result};

/// Linear regression over the window `start..end` of a series
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// Index of the first sample in the window
    pub start: usize,
    /// One past the index of the last sample in the window
    pub end: usize,
}

impl WindowFit {
    fn from_linear(fit: LinearFit, start: usize, end: usize) -> Self {
        Self {
            slope: fit.slope,
            intercept: fit.intercept,
            r_squared: fit.r_squared,
            start,
            end,
        }
    }

    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Find the contiguous window of `window_size` samples whose linear fit has maximal R²
///
/// Windows containing non-finite values, or with no spread in `x`, are skipped. Ties go to the
/// window starting earliest. `Ok(None)` means no window could be fit at all.
///
/// # Errors
/// - If `x` and `y` have different lengths
/// - If `window_size` is below two or exceeds the series length
///
/// # Examples
///
/// ```
/// use electrochem::window::find_best_linear_window;
///
/// let x = [0., 1., 2., 3., 4., 5.];
/// let y = [5., 1., 2., 3., 4., 9.];
/// let best = find_best_linear_window(&x, &y, 4).unwrap().unwrap();
///
/// assert_eq!((best.start, best.end), (1, 5));
/// approx::assert_relative_eq!(best.slope, 1.0);
/// ```
pub fn find_best_linear_window(
    x: &[f64],
    y: &[f64],
    window_size: usize,
) -> Result<Option<WindowFit>> {
    if x.len() != y.len() {
        return Err(Error::invalid(format!(
            "window search needs paired series, got lengths {} and {}",
            x.len(),
            y.len()
        )));
    }
    if window_size < 2 || x.len() < window_size {
        return Err(Error::InsufficientData {
            required: window_size.max(2),
            available: x.len(),
        });
    }

    let mut best: Option<WindowFit> = None;
    for start in 0..=x.len() - window_size {
        let end = start + window_size;
        let Some(fit) = linear_fit(&x[start..end], &y[start..end]) else {
            continue;
        };
        if best.map_or(true, |current| fit.r_squared > current.r_squared) {
            best = Some(WindowFit::from_linear(fit, start, end));
        }
    }

    Ok(best)
}

use ndarray::Array1;

use crate::polyfit::{polyfit, polyval};
use crate::{Error, Result};

/// Savitzky–Golay smoothing with a fixed window and polynomial order
///
/// Interior samples are the convolution of the series with the least squares smoothing kernel.
/// The first and last half-window are taken from a polynomial fit over the first and last full
/// window respectively. Series shorter than the window are smoothed with the largest odd window
/// that still fits, or returned unchanged when no such window exceeds the polynomial order.
///
/// # Errors
/// Returns an error if `window` is even or not larger than `order`.
pub fn savitzky_golay(y: &[f64], window: usize, order: usize) -> Result<Vec<f64>> {
    if window % 2 == 0 || window <= order {
        return Err(Error::invalid(format!(
            "Savitzky-Golay window must be odd and exceed the order {order}, got {window}"
        )));
    }

    let n = y.len();
    let window = if n < window {
        if n % 2 == 0 {
            n.saturating_sub(1)
        } else {
            n
        }
    } else {
        window
    };
    if window <= order {
        return Ok(y.to_vec());
    }

    let half = window / 2;
    let kernel = kernel(window, order)?;

    let mut smoothed = vec![0.0; n];
    for ii in half..n - half {
        smoothed[ii] = kernel
            .iter()
            .zip(&y[ii - half..=ii + half])
            .map(|(k, v)| k * v)
            .sum();
    }

    #[allow(clippy::cast_precision_loss)]
    let positions = (0..window).map(|ii| ii as f64).collect::<Vec<_>>();

    let head = polyfit(&positions, &y[..window], order)?;
    for (ii, value) in smoothed.iter_mut().enumerate().take(half) {
        *value = polyval(&head, positions[ii]);
    }

    let tail = polyfit(&positions, &y[n - window..], order)?;
    for (offset, value) in smoothed[n - half..].iter_mut().enumerate() {
        *value = polyval(&tail, positions[window - half + offset]);
    }

    Ok(smoothed)
}

/// Convolution weights which evaluate the local least squares polynomial at the window centre
fn kernel(window: usize, order: usize) -> Result<Array1<f64>> {
    let half = window / 2;
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    let offsets = (0..window)
        .map(|ii| ii as f64 - half as f64)
        .collect::<Vec<_>>();

    // The smoothed value is linear in the data, so fitting each unit impulse in turn yields the
    // weight of that sample
    let mut weights = Array1::zeros(window);
    let mut impulse = vec![0.0; window];
    for kk in 0..window {
        impulse[kk] = 1.0;
        weights[kk] = polyfit(&offsets, &impulse, order)?[0];
        impulse[kk] = 0.0;
    }
    Ok(weights)
}

/// Centred moving average, the window shrinking at the boundaries
pub fn moving_average(y: &[f64], window: usize) -> Vec<f64> {
    let n = y.len();
    if window <= 1 || n == 0 {
        return y.to_vec();
    }
    let half = window / 2;
    (0..n)
        .map(|ii| {
            let lo = ii.saturating_sub(half);
            let hi = (ii + half + 1).min(n);
            let slice = &y[lo..hi];
            #[allow(clippy::cast_precision_loss)]
            let len = slice.len() as f64;
            slice.iter().sum::<f64>() / len
        })
        .collect()
}

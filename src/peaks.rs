/// Strategy for locating local maxima in a one dimensional signal
///
/// Implementations return the indices of accepted maxima in increasing order. Callers looking
/// for minima pass the negated signal.
pub trait PeakFinder: Send + Sync {
    fn find_peaks(&self, signal: &[f64]) -> Vec<usize>;
}

/// Local maxima filtered by topographic prominence
///
/// The prominence of a peak is its height above the higher of the two lowest points reached
/// before the signal climbs above the peak again on either side (or ends). Peaks are accepted
/// when their prominence is at least `relative_prominence` times the full range of the signal.
#[derive(Clone, Copy, Debug)]
pub struct ProminencePeakFinder {
    pub relative_prominence: f64,
}

impl Default for ProminencePeakFinder {
    fn default() -> Self {
        Self {
            relative_prominence: 0.05,
        }
    }
}

impl ProminencePeakFinder {
    pub const fn new(relative_prominence: f64) -> Self {
        Self {
            relative_prominence,
        }
    }
}

impl PeakFinder for ProminencePeakFinder {
    fn find_peaks(&self, signal: &[f64]) -> Vec<usize> {
        let (lo, hi) = signal
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let span = hi - lo;
        if !span.is_finite() || span <= 0.0 {
            return vec![];
        }
        let threshold = self.relative_prominence * span;

        local_maxima(signal)
            .into_iter()
            .filter(|&idx| prominence(signal, idx) >= threshold)
            .collect()
    }
}

/// Indices of local maxima; flat-topped maxima report their left-most sample
pub fn local_maxima(signal: &[f64]) -> Vec<usize> {
    let n = signal.len();
    let mut maxima = vec![];
    if n < 3 {
        return maxima;
    }

    let mut ii = 1;
    while ii < n - 1 {
        if signal[ii] > signal[ii - 1] {
            // walk across a plateau
            let mut ahead = ii + 1;
            while ahead < n - 1 && signal[ahead] == signal[ii] {
                ahead += 1;
            }
            if signal[ahead] < signal[ii] {
                maxima.push(ii);
                ii = ahead;
                continue;
            }
        }
        ii += 1;
    }
    maxima
}

/// Height of the peak at `idx` above its surrounding bases
pub fn prominence(signal: &[f64], idx: usize) -> f64 {
    let peak = signal[idx];

    let mut left_min = peak;
    for &v in signal[..idx].iter().rev() {
        if v > peak {
            break;
        }
        left_min = left_min.min(v);
    }

    let mut right_min = peak;
    for &v in &signal[idx + 1..] {
        if v > peak {
            break;
        }
        right_min = right_min.min(v);
    }

    peak - left_min.max(right_min)
}

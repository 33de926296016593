use crate::math::median;

/// Strategy for locating a regime change in a signal
///
/// Returns the index of the first sample of the new regime, or `None` if the signal does not
/// change regime. `None` is a valid outcome, not an error.
pub trait ChangePointDetector: Send + Sync {
    fn detect(&self, signal: &[f64]) -> Option<usize>;
}

/// Single change point under an absolute deviation (L1) cost
///
/// The cost of a segment is the summed absolute deviation from its median. The split minimising
/// the summed cost of the two halves is accepted when it lowers the unsplit cost by more than
/// `penalty`. Candidate splits are restricted to multiples of `jump` leaving at least `min_size`
/// samples on either side.
#[derive(Clone, Copy, Debug)]
pub struct L1ChangePoint {
    pub penalty: f64,
    pub min_size: usize,
    pub jump: usize,
}

impl Default for L1ChangePoint {
    fn default() -> Self {
        Self {
            penalty: 10.0,
            min_size: 2,
            jump: 5,
        }
    }
}

fn l1_cost(segment: &[f64]) -> f64 {
    let centre = median(segment);
    segment.iter().map(|v| (v - centre).abs()).sum()
}

impl ChangePointDetector for L1ChangePoint {
    fn detect(&self, signal: &[f64]) -> Option<usize> {
        let n = signal.len();
        let min_size = self.min_size.max(1);
        if n < 2 * min_size || signal.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let unsplit = l1_cost(signal);
        let jump = self.jump.max(1);

        let mut best: Option<(usize, f64)> = None;
        for split in (min_size..=n - min_size).filter(|k| k % jump == 0) {
            let cost = l1_cost(&signal[..split]) + l1_cost(&signal[split..]);
            if best.map_or(true, |(_, lowest)| cost < lowest) {
                best = Some((split, cost));
            }
        }

        best.and_then(|(split, cost)| (unsplit - cost > self.penalty).then_some(split))
    }
}

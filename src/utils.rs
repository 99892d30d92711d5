#[derive(Default, Debug, Clone, Copy)]
pub struct RunningMean {
    sum: f64,
    length: usize,
}

impl RunningMean {
    pub fn feed(&mut self, value: f64, times: usize) {
        self.sum += value * times as f64;
        self.length += times;
    }

    pub fn clear(&mut self) {
        self.sum = 0.0;
        self.length = 0;
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn avg(&self) -> Option<f64> {
        (self.length > 0).then(|| self.sum / self.length as f64)
    }
}

impl FromIterator<f64> for RunningMean {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut mean = RunningMean::default();
        for value in iter {
            mean.feed(value, 1);
        }
        mean
    }
}

/// Linear-interpolated quantile of an ascending slice.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;

    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

#[cfg(test)]
mod tests {
    use super::{quantile, RunningMean};

    #[test]
    fn unittest_running_mean() {
        let mut mean = RunningMean::default();
        assert_eq!(mean.avg(), None);

        mean.feed(10.0, 2);
        mean.feed(40.0, 1);
        assert_eq!(mean.avg(), Some(20.0));
        assert_eq!(mean.len(), 3);

        mean.clear();
        assert!(mean.is_empty());

        let mean: RunningMean = [1.0, 2.0, 3.0].into_iter().collect();
        assert_eq!(mean.avg(), Some(2.0));
    }

    #[test]
    fn unittest_quantile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];

        assert_eq!(quantile(&values, 0.0), Some(1.0));
        assert_eq!(quantile(&values, 0.5), Some(2.5));
        assert_eq!(quantile(&values, 0.25), Some(1.75));
        assert_eq!(quantile(&values, 1.0), Some(4.0));
        assert_eq!(quantile(&[], 0.5), None);
    }
}

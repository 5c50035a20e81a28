use std::collections::BTreeMap;

/// Fixed-width histogram with lazily created bins
///
/// A value `v` lands in bin `floor(v / bin_width)`. Negative and NaN values (e.g. caused by clock
/// skew) are counted in bin 0 instead of being discarded.
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    bin_width: f64,
    bins: BTreeMap<u64, u64>,
}

impl Histogram {
    /// Creates an empty histogram
    ///
    /// The caller is responsible for passing a positive, finite width (see
    /// [`crate::config::MonitorConfig::validate`]).
    pub fn new(bin_width: f64) -> Self {
        Self {
            bin_width,
            bins: BTreeMap::new(),
        }
    }

    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    pub fn bin_index(&self, value: f64) -> u64 {
        if value.is_nan() || value <= 0.0 {
            return 0;
        }

        // Float to int casts saturate, so absurdly large values end up in the last bin
        (value / self.bin_width).floor() as u64
    }

    pub fn add_value(&mut self, value: f64) {
        let index = self.bin_index(value);
        let count = self.bins.entry(index).or_default();
        *count = count.saturating_add(1);
    }

    pub fn count(&self, index: u64) -> u64 {
        self.bins.get(&index).copied().unwrap_or(0)
    }

    /// Sum of the counts of all bins
    pub fn total(&self) -> u64 {
        self.bins.values().fold(0, |acc, c| acc.saturating_add(*c))
    }

    /// Non-empty bins as `(index, count)`, in ascending index order
    pub fn bins(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.bins.iter().map(|(index, count)| (*index, *count))
    }

    /// Number of bins the histogram spans, i.e. one past the highest non-empty index
    pub fn n_bins(&self) -> u64 {
        self.bins
            .last_key_value()
            .map(|(index, _)| index.saturating_add(1))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_value_lands_in_floor_bin() {
        let mut histogram = Histogram::new(0.001);
        for value in [0.0, 0.0005, 0.030, 0.0301, 1.2345] {
            histogram.add_value(value);
            let expected = (value / 0.001_f64).floor() as u64;
            assert_eq!(histogram.bin_index(value), expected);
            assert!(histogram.count(expected) >= 1);
        }

        assert_eq!(histogram.total(), 5);
    }

    #[test]
    fn test_packet_size_bins() {
        let mut histogram = Histogram::new(20.0);
        histogram.add_value(1000.0);
        histogram.add_value(1019.0);
        histogram.add_value(1020.0);

        assert_eq!(histogram.bins().collect::<Vec<_>>(), vec![(50, 2), (51, 1)]);
        assert_eq!(histogram.n_bins(), 52);
    }

    #[test]
    fn test_negative_and_nan_values_are_clamped_into_first_bin() {
        let mut histogram = Histogram::new(0.5);
        histogram.add_value(-3.0);
        histogram.add_value(f64::NAN);

        assert_eq!(histogram.count(0), 2);
        assert_eq!(histogram.total(), 2);
    }

    #[test]
    fn test_bins_are_sparse_and_ordered() {
        let mut histogram = Histogram::new(1.0);
        histogram.add_value(1e9);
        histogram.add_value(3.5);
        histogram.add_value(0.2);

        let indices: Vec<_> = histogram.bins().map(|(index, _)| index).collect();
        assert_eq!(indices, vec![0, 3, 1_000_000_000]);
        assert!(!histogram.is_empty());
        assert!(Histogram::new(1.0).is_empty());
    }
}

//! Target selection strategies.
//!
//! [`WeightedSelector`] draws targets at random in proportion to their
//! configured weights, honoring an exclusion set of already-failed indices.
//! [`RoundRobinSelector`] strides a counter over the targets and is used
//! where plain rotation is wanted (WebSocket pass-through, probe URLs).
//!
//! Selectors are immutable after construction; the weighted draw uses the
//! thread-local RNG stream, so `get_next` is reentrant.

use rand::Rng;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("no targets available")]
    NoTargets,

    #[error("all targets excluded")]
    AllExcluded,

    #[error("number of targets ({targets}) must match number of weights ({weights})")]
    LengthMismatch { targets: usize, weights: usize },

    #[error("weights must be finite and non-negative")]
    InvalidWeight,

    #[error("total weight must be greater than zero")]
    ZeroTotalWeight,
}

/// A pick strategy over a fixed set of targets.
pub trait Selector<T>: Send + Sync {
    /// Returns a target and its index, never picking an excluded index.
    fn get_next(&self, exclude: &[usize]) -> Result<(Arc<T>, usize), SelectorError>;

    fn is_available(&self) -> bool {
        self.targets_count() != 0
    }

    fn targets_count(&self) -> usize;
}

/// Weighted probabilistic selector over normalized cumulative weights.
#[derive(Debug)]
pub struct WeightedSelector<T> {
    targets: Vec<Arc<T>>,
    weights: Vec<f64>,
    cumulative: Vec<f64>,
}

impl<T> WeightedSelector<T> {
    /// Builds the selector, normalizing weights to sum to 1.0.
    ///
    /// # Errors
    ///
    /// Fails when the lists differ in length, are empty, contain a negative
    /// or non-finite weight, or sum to zero.
    pub fn new(targets: Vec<Arc<T>>, weights: Vec<f64>) -> Result<Self, SelectorError> {
        if targets.len() != weights.len() {
            return Err(SelectorError::LengthMismatch {
                targets: targets.len(),
                weights: weights.len(),
            });
        }
        if targets.is_empty() {
            return Err(SelectorError::NoTargets);
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SelectorError::InvalidWeight);
        }

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(SelectorError::ZeroTotalWeight);
        }

        let normalized: Vec<f64> = weights.iter().map(|w| w / total).collect();
        let mut running = 0.0;
        let cumulative = normalized
            .iter()
            .map(|w| {
                running += w;
                running
            })
            .collect();

        Ok(Self { targets, weights: normalized, cumulative })
    }

    #[must_use]
    pub fn targets(&self) -> &[Arc<T>] {
        &self.targets
    }
}

impl<T: Send + Sync> Selector<T> for WeightedSelector<T> {
    fn get_next(&self, exclude: &[usize]) -> Result<(Arc<T>, usize), SelectorError> {
        if self.targets.is_empty() {
            return Err(SelectorError::NoTargets);
        }

        // Fast path: nothing excluded, walk the precomputed cumulative array.
        if exclude.is_empty() {
            let u: f64 = rand::thread_rng().gen();
            for (i, cw) in self.cumulative.iter().enumerate() {
                if u <= *cw {
                    return Ok((Arc::clone(&self.targets[i]), i));
                }
            }
            // Rounding can leave the last bucket fractionally short of 1.0.
            let last = self.targets.len() - 1;
            return Ok((Arc::clone(&self.targets[last]), last));
        }

        let mut excluded = exclude.to_vec();
        excluded.sort_unstable();

        // Rebuild a reduced cumulative array over the surviving targets.
        let mut kept = Vec::with_capacity(self.targets.len());
        let mut reduced = Vec::with_capacity(self.targets.len());
        let mut sum = 0.0;
        let mut ex = 0;
        for i in 0..self.targets.len() {
            if ex < excluded.len() && excluded[ex] == i {
                ex += 1;
                continue;
            }
            sum += self.weights[i];
            kept.push(i);
            reduced.push(sum);
        }

        if kept.is_empty() {
            return Err(SelectorError::AllExcluded);
        }
        if sum <= 0.0 {
            // Every surviving weight is zero; fall back to the first one.
            return Ok((Arc::clone(&self.targets[kept[0]]), kept[0]));
        }

        let u: f64 = rand::thread_rng().gen::<f64>() * sum;
        for (pos, cw) in reduced.iter().enumerate() {
            if u <= *cw {
                let i = kept[pos];
                return Ok((Arc::clone(&self.targets[i]), i));
            }
        }

        let i = *kept.last().unwrap_or(&0);
        Ok((Arc::clone(&self.targets[i]), i))
    }

    fn targets_count(&self) -> usize {
        self.targets.len()
    }
}

/// Strides a monotone counter over the targets; exclusions are ignored.
#[derive(Debug)]
pub struct RoundRobinSelector<T> {
    targets: Vec<Arc<T>>,
    counter: AtomicUsize,
}

impl<T> RoundRobinSelector<T> {
    #[must_use]
    pub fn new(targets: Vec<Arc<T>>) -> Self {
        Self { targets, counter: AtomicUsize::new(0) }
    }

    /// Target at `counter` modulo the target count.
    #[must_use]
    pub fn get_by_counter(&self, counter: usize) -> Option<Arc<T>> {
        if self.targets.is_empty() {
            return None;
        }
        Some(Arc::clone(&self.targets[counter % self.targets.len()]))
    }

    #[must_use]
    pub fn counter(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn inc_counter(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl<T: Send + Sync> Selector<T> for RoundRobinSelector<T> {
    fn get_next(&self, _exclude: &[usize]) -> Result<(Arc<T>, usize), SelectorError> {
        if self.targets.is_empty() {
            return Err(SelectorError::NoTargets);
        }
        let i = self.counter.fetch_add(1, Ordering::Relaxed) % self.targets.len();
        Ok((Arc::clone(&self.targets[i]), i))
    }

    fn targets_count(&self) -> usize {
        self.targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(names: &[&str]) -> Vec<Arc<String>> {
        names.iter().map(|n| Arc::new((*n).to_string())).collect()
    }

    #[test]
    fn construction_validation() {
        assert_eq!(
            WeightedSelector::new(named(&["a"]), vec![1.0, 2.0]).unwrap_err(),
            SelectorError::LengthMismatch { targets: 1, weights: 2 }
        );
        assert_eq!(
            WeightedSelector::<String>::new(vec![], vec![]).unwrap_err(),
            SelectorError::NoTargets
        );
        assert_eq!(
            WeightedSelector::new(named(&["a"]), vec![-1.0]).unwrap_err(),
            SelectorError::InvalidWeight
        );
        assert_eq!(
            WeightedSelector::new(named(&["a"]), vec![f64::NAN]).unwrap_err(),
            SelectorError::InvalidWeight
        );
        assert_eq!(
            WeightedSelector::new(named(&["a", "b"]), vec![0.0, 0.0]).unwrap_err(),
            SelectorError::ZeroTotalWeight
        );
    }

    #[test]
    fn single_target_always_selected() {
        let s = WeightedSelector::new(named(&["only"]), vec![5.0]).unwrap();
        for _ in 0..100 {
            let (t, i) = s.get_next(&[]).unwrap();
            assert_eq!(*t, "only");
            assert_eq!(i, 0);
        }
    }

    #[test]
    fn distribution_follows_weights() {
        let s = WeightedSelector::new(named(&["a", "b", "c"]), vec![3.0, 1.0, 1.0]).unwrap();

        const DRAWS: usize = 100_000;
        let mut counts = [0usize; 3];
        for _ in 0..DRAWS {
            let (_, i) = s.get_next(&[]).unwrap();
            counts[i] += 1;
        }

        let expected = [0.6, 0.2, 0.2];
        for (i, exp) in expected.iter().enumerate() {
            let observed = counts[i] as f64 / DRAWS as f64;
            assert!(
                (observed - exp).abs() < 0.02,
                "index {i}: observed {observed:.3}, expected {exp:.3}"
            );
        }
    }

    #[test]
    fn never_returns_excluded_index() {
        let s =
            WeightedSelector::new(named(&["a", "b", "c", "d"]), vec![1.0, 1.0, 1.0, 1.0]).unwrap();
        for _ in 0..1_000 {
            let (_, i) = s.get_next(&[1, 3]).unwrap();
            assert!(i == 0 || i == 2, "excluded index {i} returned");
        }
    }

    #[test]
    fn exclusion_shifts_distribution() {
        let s = WeightedSelector::new(named(&["a", "b", "c"]), vec![3.0, 1.0, 1.0]).unwrap();

        const DRAWS: usize = 50_000;
        let mut counts = [0usize; 3];
        for _ in 0..DRAWS {
            let (_, i) = s.get_next(&[0]).unwrap();
            counts[i] += 1;
        }

        assert_eq!(counts[0], 0);
        // Remaining weights are equal, so the split should be ~50/50.
        let observed = counts[1] as f64 / DRAWS as f64;
        assert!((observed - 0.5).abs() < 0.03, "observed {observed:.3}");
    }

    #[test]
    fn all_excluded_is_an_error() {
        let s = WeightedSelector::new(named(&["a", "b"]), vec![1.0, 1.0]).unwrap();
        assert_eq!(s.get_next(&[0, 1]).unwrap_err(), SelectorError::AllExcluded);
        // Duplicates and out-of-order exclusions behave the same.
        assert_eq!(s.get_next(&[1, 0, 1]).unwrap_err(), SelectorError::AllExcluded);
    }

    #[test]
    fn zero_weight_survivors_fall_back_to_first() {
        let s = WeightedSelector::new(named(&["a", "b", "c"]), vec![1.0, 0.0, 0.0]).unwrap();
        for _ in 0..100 {
            let (t, i) = s.get_next(&[0]).unwrap();
            assert_eq!(i, 1, "expected first surviving target, got {t}");
        }
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let s = RoundRobinSelector::new(named(&["a", "b", "c"]));
        let picks: Vec<usize> = (0..6).map(|_| s.get_next(&[]).unwrap().1).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(s.targets_count(), 3);
        assert!(s.is_available());
    }

    #[test]
    fn round_robin_counter_ops() {
        let s = RoundRobinSelector::new(named(&["a", "b"]));
        assert_eq!(s.counter(), 0);
        s.inc_counter();
        s.inc_counter();
        assert_eq!(s.counter(), 2);
        assert_eq!(*s.get_by_counter(3).unwrap(), "b");
        assert_eq!(*s.get_by_counter(4).unwrap(), "a");
    }

    #[test]
    fn round_robin_empty() {
        let s = RoundRobinSelector::<String>::new(vec![]);
        assert!(!s.is_available());
        assert_eq!(s.get_next(&[]).unwrap_err(), SelectorError::NoTargets);
        assert!(s.get_by_counter(0).is_none());
    }
}

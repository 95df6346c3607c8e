//! Weighted item distributions with cross-entropy updates.
//!
//! Backing storage is an insertion-ordered map from item to weight. Items
//! are never mutated in place; changing an item means removing it and
//! adding the replacement. Two derived values are cached lazily and dropped
//! whenever a weight changes: the prefix-sum array used for sampling and the
//! KL-size (effective item count).

use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use indexmap::IndexMap;
use rand::Rng;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

/// Tolerance for normalization, snapping and sampling exclusion.
pub const EPSILON: f64 = 1e-4;

/// A mapping from items to non-negative weights.
///
/// After [`normalize`](Self::normalize) the weights sum to 1 within
/// [`EPSILON`], or the distribution is empty.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use cerrla::ProbabilityDistribution;
///
/// let mut dist = ProbabilityDistribution::new();
/// dist.add("r1");
/// dist.add("r2");
/// dist.normalize();
///
/// let counts = HashMap::from([("r1", 10.0)]);
/// dist.update_distribution(&counts, 10.0, 1.0);
/// assert_eq!(dist.weight(&"r1"), Some(1.0));
/// assert_eq!(dist.weight(&"r2"), Some(0.0));
/// ```
#[derive(Debug, Clone)]
pub struct ProbabilityDistribution<T: Eq + Hash> {
    items: IndexMap<T, f64>,
    /// Cumulative weights paired with item indices, omitting items below `EPSILON`.
    prefix: OnceCell<Vec<(f64, usize)>>,
    kl_size: OnceCell<f64>,
}

impl<T: Eq + Hash> Default for ProbabilityDistribution<T> {
    fn default() -> Self {
        Self {
            items: IndexMap::new(),
            prefix: OnceCell::new(),
            kl_size: OnceCell::new(),
        }
    }
}

impl<T: Clone + Eq + Hash + Ord> ProbabilityDistribution<T> {
    /// Creates an empty distribution.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if there are no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True if `item` is present.
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains_key(item)
    }

    /// Weight of `item`, if present.
    #[must_use]
    pub fn weight(&self, item: &T) -> Option<f64> {
        self.items.get(item).copied()
    }

    /// Items and weights in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&T, f64)> {
        self.items.iter().map(|(k, v)| (k, *v))
    }

    /// Sum of all weights.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.items.values().sum()
    }

    /// Adds `item` with weight 1. Returns false if it was already present.
    pub fn add(&mut self, item: T) -> bool {
        self.add_with_weight(item, 1.0)
    }

    /// Adds `item` with `weight` (clamped to be non-negative).
    ///
    /// Returns false, leaving the existing weight untouched, if the item was
    /// already present.
    pub fn add_with_weight(&mut self, item: T, weight: f64) -> bool {
        if self.items.contains_key(&item) {
            return false;
        }
        self.items.insert(item, sanitize(weight));
        self.invalidate();
        true
    }

    /// Overwrites the weight of an existing item. Returns false if absent.
    pub fn set_weight(&mut self, item: &T, weight: f64) -> bool {
        match self.items.get_mut(item) {
            Some(w) => {
                *w = sanitize(weight);
                self.invalidate();
                true
            }
            None => false,
        }
    }

    /// Removes `item`. Returns false if absent. Does not renormalize.
    pub fn remove(&mut self, item: &T) -> bool {
        let removed = self.items.shift_remove(item).is_some();
        if removed {
            self.invalidate();
        }
        removed
    }

    /// Rescales weights to sum to 1.
    ///
    /// A zero total is replaced by the uniform distribution. Does nothing if
    /// the distribution is empty or already sums to 1 within [`EPSILON`].
    pub fn normalize(&mut self) {
        if self.items.is_empty() {
            return;
        }
        let total = self.total();
        if (total - 1.0).abs() < EPSILON {
            return;
        }
        if total <= 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let uniform = 1.0 / self.items.len() as f64;
            for w in self.items.values_mut() {
                *w = uniform;
            }
        } else {
            for w in self.items.values_mut() {
                *w /= total;
            }
        }
        self.invalidate();
    }

    /// The maximum-weight item; ties go to the structurally smallest item.
    #[must_use]
    pub fn most_likely(&self) -> Option<&T> {
        self.items
            .iter()
            .max_by(|(ka, wa), (kb, wb)| wa.total_cmp(wb).then_with(|| kb.cmp(ka)))
            .map(|(k, _)| k)
    }

    /// Samples an item.
    ///
    /// With `use_most_likely` the result is deterministic (see
    /// [`most_likely`](Self::most_likely)). Otherwise an item is drawn in
    /// proportion to its weight; items below [`EPSILON`] are never drawn.
    /// Returns `None` if nothing can be drawn.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, use_most_likely: bool) -> Option<&T> {
        if use_most_likely {
            return self.most_likely();
        }
        let prefix = self.prefix.get_or_init(|| {
            let mut acc = 0.0;
            self.items
                .values()
                .enumerate()
                .filter(|(_, w)| **w >= EPSILON)
                .map(|(i, w)| {
                    acc += w;
                    (acc, i)
                })
                .collect()
        });
        let &(total, _) = prefix.last()?;
        let target = rng.gen::<f64>() * total;
        let pos = prefix.partition_point(|(cum, _)| *cum <= target);
        let (_, index) = prefix.get(pos).or_else(|| prefix.last())?;
        self.items.get_index(*index).map(|(k, _)| k)
    }

    /// Samples an item, removes it and renormalizes the remainder.
    pub fn sample_with_removal<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<T> {
        let item = self.sample(rng, false)?.clone();
        self.remove(&item);
        self.normalize();
        Some(item)
    }

    /// Items sorted by descending weight; equal weights keep insertion order.
    #[must_use]
    pub fn ordered_items(&self) -> Vec<(&T, f64)> {
        let mut ordered: Vec<(&T, f64)> = self.iter().collect();
        ordered.sort_by(|a, b| b.1.total_cmp(&a.1));
        ordered
    }

    /// Shannon entropy (nats) of the normalized weights.
    #[must_use]
    pub fn entropy(&self) -> f64 {
        let total = self.total();
        if total <= 0.0 {
            #[allow(clippy::cast_precision_loss)]
            return (self.items.len().max(1) as f64).ln();
        }
        self.items
            .values()
            .map(|w| w / total)
            .filter(|p| *p > 0.0)
            .map(|p| -p * p.ln())
            .sum()
    }

    /// Effective number of distinct items.
    ///
    /// Derived from the KL divergence of the distribution from the uniform
    /// distribution over its items: `exp(ln n - KL)`, clamped to `[1, n]`.
    /// Returns 0 when there is at most one item.
    #[must_use]
    pub fn kl_size(&self) -> f64 {
        *self.kl_size.get_or_init(|| {
            let n = self.items.len();
            if n <= 1 {
                return 0.0;
            }
            #[allow(clippy::cast_precision_loss)]
            let n = n as f64;
            // KL(p || uniform) = ln n - H(p)
            let kl = n.ln() - self.entropy();
            (n.ln() - kl).exp().clamp(1.0, n)
        })
    }

    /// Cross-entropy update from observed counts.
    ///
    /// Each item's observed frequency is `min(count / num_samples, 1)` (items
    /// missing from `counts` count 0) and its new weight is
    /// `step_size * observed + (1 - step_size) * old`, snapped to 0 below
    /// [`EPSILON`] and to 1 above `1 - EPSILON`. The distribution is then
    /// normalized. Does nothing if `num_samples` is not positive.
    ///
    /// Returns false, leaving all weights untouched, if the update is not applied.
    pub fn update_distribution(
        &mut self,
        counts: &HashMap<T, f64>,
        num_samples: f64,
        step_size: f64,
    ) -> bool {
        if num_samples <= 0.0 || !num_samples.is_finite() {
            return false;
        }
        self.blend(|item| {
            let count = counts.get(item).copied().unwrap_or(0.0);
            if count.is_finite() {
                ((count / num_samples).min(1.0), step_size)
            } else {
                (f64::NAN, step_size)
            }
        })
    }

    /// Moves every weight toward `observed`'s weight for the same item.
    ///
    /// Items absent from `observed` move toward 0.
    pub fn update_toward(&mut self, observed: &Self, step_size: f64) -> bool {
        self.blend(|item| (observed.weight(item).unwrap_or(0.0), step_size))
    }

    /// Like [`update_toward`](Self::update_toward) with a step size per item.
    ///
    /// Items missing from `step_sizes` use `default_step`.
    pub fn update_toward_per_item(
        &mut self,
        observed: &Self,
        step_sizes: &HashMap<T, f64>,
        default_step: f64,
    ) -> bool {
        self.blend(|item| {
            (
                observed.weight(item).unwrap_or(0.0),
                step_sizes.get(item).copied().unwrap_or(default_step),
            )
        })
    }

    /// Applies `new = step * target + (1 - step) * old` to every item.
    ///
    /// All new weights are computed before any is written, so a rejected
    /// update leaves the distribution exactly as it was.
    fn blend(&mut self, target_and_step: impl Fn(&T) -> (f64, f64)) -> bool {
        if self.items.is_empty() {
            return false;
        }
        let mut updated = Vec::with_capacity(self.items.len());
        for (item, old) in &self.items {
            let (target, step) = target_and_step(item);
            if !target.is_finite() || !step.is_finite() {
                return false;
            }
            let step = step.clamp(0.0, 1.0);
            let mut weight = step * target.max(0.0) + (1.0 - step) * old;
            if weight < EPSILON {
                weight = 0.0;
            } else if weight > 1.0 - EPSILON {
                weight = 1.0;
            }
            updated.push(weight);
        }
        for (w, new) in self.items.values_mut().zip(updated) {
            *w = new;
        }
        self.invalidate();
        self.normalize();
        true
    }

    fn invalidate(&mut self) {
        self.prefix = OnceCell::new();
        self.kl_size = OnceCell::new();
    }
}

fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() {
        weight.max(0.0)
    } else {
        0.0
    }
}

impl<T: Clone + Eq + Hash + Ord> FromIterator<(T, f64)> for ProbabilityDistribution<T> {
    fn from_iter<I: IntoIterator<Item = (T, f64)>>(iter: I) -> Self {
        let mut dist = Self::new();
        for (item, weight) in iter {
            dist.add_with_weight(item, weight);
        }
        dist
    }
}

impl<T: Eq + Hash> PartialEq for ProbabilityDistribution<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: Eq + Hash + fmt::Display> fmt::Display for ProbabilityDistribution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (item, weight) in &self.items {
            write!(f, "({item}:{weight})")?;
        }
        write!(f, "}}")
    }
}

impl<T: Eq + Hash + Serialize> Serialize for ProbabilityDistribution<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.iter())
    }
}

impl<'de, T> Deserialize<'de> for ProbabilityDistribution<T>
where
    T: Clone + Eq + Hash + Ord + Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Vec::<(T, f64)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn dist(pairs: &[(&'static str, f64)]) -> ProbabilityDistribution<&'static str> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn normalize_rescales_and_handles_zero_total() {
        let mut d = dist(&[("a", 2.0), ("b", 6.0)]);
        d.normalize();
        assert!((d.weight(&"a").unwrap() - 0.25).abs() < 1e-12);

        let mut z = dist(&[("a", 0.0), ("b", 0.0), ("c", 0.0), ("d", 0.0)]);
        z.normalize();
        assert_eq!(z.weight(&"c"), Some(0.25));

        let mut empty = ProbabilityDistribution::<&str>::new();
        empty.normalize();
        assert!(empty.is_empty());
    }

    #[test]
    fn add_does_not_overwrite() {
        let mut d = dist(&[("a", 0.3)]);
        assert!(!d.add("a"));
        assert_eq!(d.weight(&"a"), Some(0.3));
        assert!(!d.remove(&"zz"));
        assert!(!d.set_weight(&"zz", 1.0));
    }

    #[test]
    fn most_likely_breaks_ties_structurally() {
        let d = dist(&[("b", 0.5), ("a", 0.5)]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert_eq!(d.sample(&mut rng, true), Some(&"a"));
        assert_eq!(ProbabilityDistribution::<&str>::new().most_likely(), None);
    }

    #[test]
    fn sampling_skips_negligible_items() {
        let d = dist(&[("a", 0.0), ("b", 1.0), ("c", EPSILON / 2.0)]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..200 {
            assert_eq!(d.sample(&mut rng, false), Some(&"b"));
        }
    }

    #[test]
    fn sampling_empty_returns_none() {
        let d = ProbabilityDistribution::<&str>::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(d.sample(&mut rng, false).is_none());
        let zero = dist(&[("a", 0.0)]);
        assert!(zero.sample(&mut rng, false).is_none());
    }

    #[test]
    fn sampling_follows_weights() {
        let d = dist(&[("a", 0.8), ("b", 0.2)]);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let hits = (0..5000)
            .filter(|_| d.sample(&mut rng, false) == Some(&"a"))
            .count();
        assert!((3700..4300).contains(&hits), "hits = {hits}");
    }

    #[test]
    fn sample_with_removal_shrinks_and_renormalizes() {
        let mut d = dist(&[("a", 0.5), ("b", 0.3), ("c", 0.2)]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let first = d.sample_with_removal(&mut rng).unwrap();
        assert!(!d.contains(&first));
        assert_eq!(d.len(), 2);
        assert!((d.total() - 1.0).abs() < EPSILON);
    }

    #[test]
    fn kl_size_bounds() {
        assert_eq!(dist(&[("a", 1.0)]).kl_size(), 0.0);
        assert_eq!(ProbabilityDistribution::<&str>::new().kl_size(), 0.0);

        let uniform = dist(&[("a", 0.25), ("b", 0.25), ("c", 0.25), ("d", 0.25)]);
        assert!((uniform.kl_size() - 4.0).abs() < 1e-9);

        let peaked = dist(&[("a", 1.0), ("b", 0.0), ("c", 0.0)]);
        assert!((peaked.kl_size() - 1.0).abs() < 1e-9);

        let mixed = dist(&[("a", 0.7), ("b", 0.2), ("c", 0.1)]);
        let k = mixed.kl_size();
        assert!(k > 1.0 && k < 3.0);
    }

    #[test]
    fn kl_size_cache_is_invalidated() {
        let mut d = dist(&[("a", 0.5), ("b", 0.5)]);
        assert!((d.kl_size() - 2.0).abs() < 1e-9);
        d.set_weight(&"b", 0.0);
        assert!((d.kl_size() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn update_from_counts_full_step() {
        let mut d = dist(&[("r1", 0.5), ("r2", 0.5)]);
        let counts = HashMap::from([("r1", 10.0), ("r2", 0.0)]);
        assert!(d.update_distribution(&counts, 10.0, 1.0));
        assert_eq!(d.weight(&"r1"), Some(1.0));
        assert_eq!(d.weight(&"r2"), Some(0.0));
    }

    #[test]
    fn update_from_counts_partial_step() {
        let mut d = dist(&[("r1", 0.5), ("r2", 0.5)]);
        let counts = HashMap::from([("r1", 3.0), ("r2", 1.0)]);
        d.update_distribution(&counts, 4.0, 0.5);
        assert!((d.weight(&"r1").unwrap() - 0.625).abs() < 1e-12);
        assert!((d.weight(&"r2").unwrap() - 0.375).abs() < 1e-12);
    }

    #[test]
    fn update_with_zero_samples_is_noop() {
        let mut d = dist(&[("r1", 0.5), ("r2", 0.5)]);
        let before = d.clone();
        assert!(!d.update_distribution(&HashMap::from([("r1", 4.0)]), 0.0, 1.0));
        assert_eq!(d, before);
    }

    #[test]
    fn rejected_update_leaves_weights_untouched() {
        let mut d = dist(&[("r1", 0.5), ("r2", 0.5)]);
        let before = d.clone();
        let counts = HashMap::from([("r2", f64::NAN)]);
        assert!(!d.update_distribution(&counts, 2.0, 0.5));
        assert_eq!(d, before);
    }

    #[test]
    fn update_toward_other_distribution() {
        let mut d = dist(&[("a", 0.5), ("b", 0.5)]);
        let target = dist(&[("a", 1.0)]);
        d.update_toward(&target, 0.5);
        assert!((d.weight(&"a").unwrap() - 0.75).abs() < 1e-12);

        let mut e = dist(&[("a", 0.5), ("b", 0.5)]);
        let steps = HashMap::from([("a", 1.0)]);
        e.update_toward_per_item(&target, &steps, 0.0);
        // a -> 1.0, b stays 0.5, then normalized
        assert!((e.weight(&"a").unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn ordered_items_descending() {
        let d = dist(&[("a", 0.2), ("b", 0.5), ("c", 0.3)]);
        let names: Vec<&str> = d.ordered_items().into_iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn display_and_serde() {
        let d = dist(&[("a", 0.25), ("b", 0.75)]);
        assert_eq!(d.to_string(), "{(a:0.25)(b:0.75)}");
        let json = serde_json::to_string(&d).unwrap();
        let back: ProbabilityDistribution<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.weight(&"b".to_string()), Some(0.75));
    }
}

//! Agree-set samples: random row pairs that agree on a focus vertical, recorded with every
//! column they agree on, for estimating errors without building partitions.

use crate::partition::Partition;
use crate::relation::ColumnLayoutRelation;
use crate::vertical::Vertical;
use rand::Rng;
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::HashMap;

/// A value estimated with some uncertainty: a point estimate and the interval around it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfidenceInterval {
    /// Lower bound.
    pub min: f64,
    /// Point estimate.
    pub mean: f64,
    /// Upper bound.
    pub max: f64,
}

impl ConfidenceInterval {
    /// An interval around `mean`.
    pub fn new(min: f64, mean: f64, max: f64) -> Self {
        debug_assert!(min <= mean && mean <= max);
        ConfidenceInterval { min, mean, max }
    }

    /// A degenerate interval holding exactly one value.
    pub fn point(value: f64) -> Self {
        ConfidenceInterval::new(value, value, value)
    }

    /// Scales all three values by `factor`.
    pub fn multiply(&self, factor: f64) -> Self {
        ConfidenceInterval::new(self.min * factor, self.mean * factor, self.max * factor)
    }
}

/// The two-sided quantile of the standard normal distribution for the given confidence
/// level, e.g. about 1.645 for 0.9.
///
/// ```
/// let z = pyro_profiler::z_score(0.95);
/// assert!((z - 1.96).abs() < 0.001);
/// ```
pub fn z_score(confidence: f64) -> f64 {
    Normal::new(0.0, 1.0).map_or(1.644_853_626_951_472_2, |normal| {
        normal.inverse_cdf((1.0 + confidence) / 2.0)
    })
}

/// A sample of row pairs that agree on a focus vertical.
///
/// For each sampled pair the sample stores its *agree set*, the set of all columns on which
/// the two rows have equal values. That is enough to estimate, for any superset of the
/// focus, how many row pairs agree on it (the key error) or agree on it while disagreeing on
/// some other column (the FD error).
#[derive(Clone, Debug)]
pub struct AgreeSetSample {
    focus: Vertical,
    agree_sets: Vec<(Vertical, u64)>,
    sample_size: u64,
    population_size: u64,
    num_tuple_pairs: u64,
    is_exact: bool,
}

fn agree_set(relation: &ColumnLayoutRelation, a: u32, b: u32) -> Vertical {
    relation
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, column)| {
            let probe = column.probing_table();
            let id = probe[a as usize];
            id != 0 && id == probe[b as usize]
        })
        .map(|(index, _)| index)
        .collect()
}

impl AgreeSetSample {
    /// Samples up to `target_size` row pairs among those agreeing on `focus`, whose partition
    /// must be given as `focus_partition`.
    ///
    /// If there are no more agreeing pairs than `target_size`, all of them are taken and the
    /// sample is exact. Otherwise each pair is drawn by picking a class with probability
    /// proportional to its number of pairs, then two distinct rows of that class, so every
    /// agreeing pair is equally likely.
    ///
    /// ```
    /// use pyro_profiler::{AgreeSetSample, ColumnLayoutRelation, Vertical};
    /// use rand::{rngs::StdRng, SeedableRng};
    ///
    /// let rows = vec![
    ///     vec![Some("a"), Some("1")],
    ///     vec![Some("a"), Some("1")],
    ///     vec![Some("a"), Some("2")],
    ///     vec![Some("b"), Some("2")],
    /// ];
    /// let relation = ColumnLayoutRelation::from_rows("t", vec!["x", "y"], rows, true).unwrap();
    /// let focus = Vertical::single(0);
    /// let mut rng = StdRng::seed_from_u64(7);
    /// let sample = AgreeSetSample::build_focused(
    ///     &relation, &focus, relation.column(0).partition(), 100, &mut rng);
    ///
    /// assert!(sample.is_exact());
    /// assert_eq!(sample.sample_size(), 3);
    /// // One pair of six agrees on both columns.
    /// let both = sample.estimate_agreements(&Vertical::new(&[0, 1]), 1.645);
    /// assert!((both.mean - 1.0 / 6.0).abs() < 1e-12);
    /// // Two of six agree on x but not on y.
    /// let fd = sample.estimate_mixed(&focus, &Vertical::single(1), 1.645);
    /// assert!((fd.mean - 2.0 / 6.0).abs() < 1e-12);
    /// ```
    pub fn build_focused<R: Rng + ?Sized>(
        relation: &ColumnLayoutRelation,
        focus: &Vertical,
        focus_partition: &Partition,
        target_size: usize,
        rng: &mut R,
    ) -> Self {
        let population_size = focus_partition.nep();
        let mut counts: HashMap<Vertical, u64> = HashMap::new();

        let (sample_size, is_exact) = if population_size <= target_size as u64 {
            for (a, b) in focus_partition.agreeing_pairs() {
                *counts.entry(agree_set(relation, a, b)).or_insert(0) += 1;
            }
            (population_size, true)
        } else {
            let classes = focus_partition.classes();
            let mut cumulative = Vec::with_capacity(classes.len());
            let mut total = 0u64;
            for class in classes.iter() {
                let n = class.len() as u64;
                total += n * (n - 1) / 2;
                cumulative.push(total);
            }
            for _ in 0..target_size {
                let pick = rng.random_range(0..total);
                let class = &classes[cumulative.partition_point(|&c| c <= pick)];
                let first = rng.random_range(0..class.len());
                let mut second = rng.random_range(0..class.len() - 1);
                if second >= first {
                    second += 1;
                }
                *counts
                    .entry(agree_set(relation, class[first], class[second]))
                    .or_insert(0) += 1;
            }
            (target_size as u64, false)
        };

        let mut agree_sets: Vec<_> = counts.into_iter().collect();
        agree_sets.sort_unstable();
        AgreeSetSample {
            focus: focus.clone(),
            agree_sets,
            sample_size,
            population_size,
            num_tuple_pairs: relation.num_tuple_pairs(),
            is_exact,
        }
    }

    /// The vertical every sampled pair agrees on.
    pub fn focus(&self) -> &Vertical {
        &self.focus
    }

    /// The number of sampled pairs.
    pub fn sample_size(&self) -> u64 {
        self.sample_size
    }

    /// The number of row pairs agreeing on the focus, i.e. the population sampled from.
    pub fn population_size(&self) -> u64 {
        self.population_size
    }

    /// Returns `true` if the sample holds every agreeing pair of the focus.
    pub fn is_exact(&self) -> bool {
        self.is_exact
    }

    /// The fraction of the population that was sampled.
    pub fn sampling_ratio(&self) -> f64 {
        if self.is_exact || self.population_size == 0 {
            1.0
        } else {
            self.sample_size as f64 / self.population_size as f64
        }
    }

    fn observations(&self, agree: &Vertical, disagree: &Vertical) -> u64 {
        self.agree_sets
            .iter()
            .filter(|(set, _)| set.is_superset(agree) && !set.intersects(disagree))
            .map(|(_, count)| *count)
            .sum()
    }

    /// Estimates the fraction of all row pairs that agree on `agree`, which must contain the
    /// focus. `z` is the normal quantile for the wanted confidence, see [`z_score`].
    pub fn estimate_agreements(&self, agree: &Vertical, z: f64) -> ConfidenceInterval {
        self.estimate_mixed(agree, &Vertical::empty(), z)
    }

    /// Estimates the fraction of all row pairs that agree on every column of `agree` and on
    /// none of the columns of `disagree`.
    ///
    /// Uses the Wilson score interval for the sampled proportion, then scales from the focus
    /// population to all row pairs.
    pub fn estimate_mixed(
        &self,
        agree: &Vertical,
        disagree: &Vertical,
        z: f64,
    ) -> ConfidenceInterval {
        debug_assert!(self.focus.is_subset(agree));
        if self.num_tuple_pairs == 0 || self.sample_size == 0 {
            return ConfidenceInterval::point(0.0);
        }
        let scale = self.population_size as f64 / self.num_tuple_pairs as f64;
        let n = self.sample_size as f64;
        let ratio = self.observations(agree, disagree) as f64 / n;
        if self.is_exact {
            return ConfidenceInterval::point(ratio).multiply(scale);
        }

        let z2 = z * z;
        let denominator = 1.0 + z2 / n;
        let center = (ratio + z2 / (2.0 * n)) / denominator;
        let spread = z / denominator * (ratio * (1.0 - ratio) / n + z2 / (4.0 * n * n)).sqrt();
        let min = (center - spread).max(0.0).min(ratio);
        let max = (center + spread).min(1.0).max(ratio);
        ConfidenceInterval::new(min, ratio, max).multiply(scale)
    }
}

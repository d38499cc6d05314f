//! Everything a profiling run shares between its search spaces.

use crate::cache::PartitionCache;
use crate::config::Settings;
use crate::error::{ProfilingError, Result};
use crate::relation::ColumnLayoutRelation;
use crate::sample::{z_score, AgreeSetSample};
use crate::strategy::{PartialFd, PartialKey};
use crate::vertical::{Vertical, VerticalMap};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Entropy figures over all columns of a relation, used to size samples and to decide which
/// partitions to cache.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct EntropyStatistics {
    /// The largest column entropy.
    pub maximum: f64,
    /// The smallest column entropy.
    pub minimum: f64,
    /// The median column entropy.
    pub median: f64,
    /// The median distance of column entropies from the largest possible entropy,
    /// `log2(rows)`.
    pub median_inverted: f64,
    /// The mean column entropy.
    pub mean: f64,
    /// The median column Gini impurity.
    pub median_gini: f64,
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

impl EntropyStatistics {
    /// Summarizes the column entropies of `relation`.
    ///
    /// ```
    /// use pyro_profiler::{ColumnLayoutRelation, EntropyStatistics};
    ///
    /// let rows = vec![
    ///     vec![Some("x"), Some("1")],
    ///     vec![Some("x"), Some("2")],
    ///     vec![Some("x"), Some("3")],
    ///     vec![Some("x"), Some("4")],
    /// ];
    /// let relation =
    ///     ColumnLayoutRelation::from_rows("t", vec!["constant", "id"], rows, true).unwrap();
    /// let stats = EntropyStatistics::of(&relation);
    /// assert_eq!(stats.minimum, 0.0);
    /// assert_eq!(stats.maximum, 2.0);
    /// assert_eq!(stats.mean, 1.0);
    /// ```
    pub fn of(relation: &ColumnLayoutRelation) -> Self {
        let summaries: Vec<_> = relation
            .columns()
            .iter()
            .map(|column| column.partition().summary())
            .collect();
        if summaries.is_empty() {
            return EntropyStatistics::default();
        }

        let entropies: Vec<f64> = summaries.iter().map(|s| s.entropy).collect();
        let ceiling = if relation.num_rows() > 1 {
            (relation.num_rows() as f64).log2()
        } else {
            0.0
        };
        EntropyStatistics {
            maximum: entropies.iter().copied().fold(0.0, f64::max),
            minimum: entropies.iter().copied().fold(f64::INFINITY, f64::min),
            median: median(entropies.clone()),
            median_inverted: median(entropies.iter().map(|e| (ceiling - e).max(0.0)).collect()),
            mean: entropies.iter().sum::<f64>() / entropies.len() as f64,
            median_gini: median(summaries.iter().map(|s| s.gini).collect()),
        }
    }
}

type KeyConsumer<'a> = Box<dyn FnMut(&PartialKey) + Send + 'a>;
type FdConsumer<'a> = Box<dyn FnMut(&PartialFd) + Send + 'a>;
type SampleSlot = Arc<OnceLock<Arc<AgreeSetSample>>>;

/// The state of one profiling run: its settings, the relation, the partition and sample
/// caches, the random generator and the consumers of discovered dependencies.
///
/// Nothing here is global, so independent runs never interfere. The context is `Sync`;
/// every mutable part sits behind its own lock.
pub struct ProfilingContext<'a> {
    settings: Settings,
    relation: &'a ColumnLayoutRelation,
    partition_cache: PartitionCache<'a>,
    samples: Mutex<VerticalMap<Arc<AgreeSetSample>>>,
    sample_builds: Mutex<HashMap<Vertical, SampleSlot>>,
    random: Arc<Mutex<StdRng>>,
    entropy: EntropyStatistics,
    z: f64,
    on_key: Mutex<KeyConsumer<'a>>,
    on_fd: Mutex<FdConsumer<'a>>,
}

impl<'a> ProfilingContext<'a> {
    /// Sets up a run over `relation`, including one agree-set sample per column when
    /// sampling is enabled.
    pub fn new(
        settings: Settings,
        relation: &'a ColumnLayoutRelation,
        on_key: impl FnMut(&PartialKey) + Send + 'a,
        on_fd: impl FnMut(&PartialFd) + Send + 'a,
    ) -> Result<Self> {
        if relation.is_empty() {
            return Err(ProfilingError::EmptyRelation);
        }
        if relation.null_equals_null() != settings.is_null_equal_null {
            return Err(ProfilingError::NullPolicyMismatch {
                relation: relation.null_equals_null(),
                configured: settings.is_null_equal_null,
            });
        }

        let entropy = EntropyStatistics::of(relation);
        let random = Arc::new(Mutex::new(StdRng::seed_from_u64(settings.seed)));
        let policy = PartitionCache::policy_for(
            settings.eviction_method,
            settings.cache_capacity,
            relation,
        );
        let partition_cache = PartitionCache::new(
            relation,
            settings.caching_method,
            settings.caching_method_value,
            entropy.maximum,
            policy,
            random.clone(),
        );

        let context = ProfilingContext {
            z: z_score(settings.estimate_confidence),
            settings,
            relation,
            partition_cache,
            samples: Mutex::new(VerticalMap::new()),
            sample_builds: Mutex::new(HashMap::new()),
            random,
            entropy,
            on_key: Mutex::new(Box::new(on_key)),
            on_fd: Mutex::new(Box::new(on_fd)),
        };

        if context.settings.sample_size > 0 {
            for column in 0..relation.num_columns() {
                context.create_focused_sample(&Vertical::single(column), 1.0);
            }
        }
        debug!(
            columns = relation.num_columns(),
            rows = relation.num_rows(),
            max_entropy = context.entropy.maximum,
            mean_entropy = context.entropy.mean,
            "profiling context ready"
        );
        Ok(context)
    }

    /// The validated settings of this run.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The relation being profiled.
    pub fn relation(&self) -> &'a ColumnLayoutRelation {
        self.relation
    }

    /// The shared partition cache.
    pub fn partition_cache(&self) -> &PartitionCache<'a> {
        &self.partition_cache
    }

    /// Column entropy figures of the relation.
    pub fn entropy_statistics(&self) -> &EntropyStatistics {
        &self.entropy
    }

    /// The normal quantile matching the configured estimate confidence.
    pub fn z_score(&self) -> f64 {
        self.z
    }

    /// Draws an integer in `0..bound` from the run's random generator.
    ///
    /// # Panics
    ///
    /// Panics if `bound` is 0.
    pub fn next_int(&self, bound: usize) -> usize {
        self.random.lock().random_range(0..bound)
    }

    /// Draws a number in `[0, 1)` from the run's random generator.
    pub fn next_double(&self) -> f64 {
        self.random.lock().random()
    }

    /// The number of row pairs a sample boosted by `boost` aims for. Relations with more
    /// uniform columns, relative to the most diverse one, get larger samples.
    pub fn sample_target_size(&self, boost: f64) -> usize {
        let spread = if self.entropy.maximum > 0.0 {
            self.entropy.mean / self.entropy.maximum
        } else {
            0.0
        };
        (self.settings.sample_size as f64 * boost * (1.0 + spread)).ceil() as usize
    }

    /// Builds an agree-set sample focused on `focus` and adds it to the sample cache, unless a
    /// cached sample for exactly that focus is already exact or at least as large.
    ///
    /// Concurrent requests for the same focus share one build.
    pub fn create_focused_sample(&self, focus: &Vertical, boost: f64) -> Arc<AgreeSetSample> {
        let target = self.sample_target_size(boost);
        // Lock order is sample_builds, then samples: a finished build is published and its
        // slot retired in one step, so a late caller sees one or the other.
        let slot = {
            let mut builds = self.sample_builds.lock();
            if let Some(existing) = self.samples.lock().get(focus) {
                if existing.is_exact() || existing.sample_size() >= target as u64 {
                    return existing.clone();
                }
            }
            builds
                .entry(focus.clone())
                .or_insert_with(|| Arc::new(OnceLock::new()))
                .clone()
        };
        let mut built_here = false;
        let sample = slot
            .get_or_init(|| {
                built_here = true;
                let partition = self.partition_cache.get_or_build(focus);
                let mut random = self.random.lock();
                Arc::new(AgreeSetSample::build_focused(
                    self.relation,
                    focus,
                    &partition,
                    target,
                    &mut *random,
                ))
            })
            .clone();

        if built_here {
            debug!(
                ?focus,
                pairs = sample.sample_size(),
                exact = sample.is_exact(),
                ratio = sample.sampling_ratio(),
                "built agree-set sample"
            );
            let mut builds = self.sample_builds.lock();
            self.samples.lock().insert(focus.clone(), sample.clone());
            builds.remove(focus);
        }
        sample
    }

    /// The cached sample best suited for estimating `vertical`: among those focused on a
    /// subset of it, the one with the highest sampling ratio, preferring larger foci on ties.
    pub fn agree_set_sample(&self, vertical: &Vertical) -> Option<Arc<AgreeSetSample>> {
        let samples = self.samples.lock();
        let best = samples
            .subset_entries(vertical)
            .into_iter()
            .max_by(|(ka, a), (kb, b)| {
                a.sampling_ratio()
                    .total_cmp(&b.sampling_ratio())
                    .then(ka.arity().cmp(&kb.arity()))
                    .then(kb.cmp(ka))
            })
            .map(|(_, sample)| sample.clone());
        best
    }

    /// Whether a new sample focused on `vertical` and boosted by `boost` would be worth
    /// building: either it could be exact, or it would at least double the sampling ratio
    /// of the best sample available now.
    pub fn should_resample(&self, vertical: &Vertical, boost: f64) -> bool {
        if self.settings.sample_size == 0 || vertical.is_empty() {
            return false;
        }
        let current = self.agree_set_sample(vertical);
        if current.as_ref().is_some_and(|sample| sample.is_exact()) {
            return false;
        }

        let target = self.sample_target_size(boost) as f64;
        let total_pairs = self.relation.num_tuple_pairs() as f64;
        let agreeing = match (self.partition_cache.peek(vertical), &current) {
            (Some(partition), _) => partition.nep() as f64,
            (None, Some(sample)) => sample.estimate_agreements(vertical, self.z).mean * total_pairs,
            (None, None) => total_pairs,
        };
        if agreeing <= target {
            return true;
        }
        match current {
            Some(sample) => target / agreeing >= 2.0 * sample.sampling_ratio(),
            None => true,
        }
    }

    /// The number of agree-set samples cached.
    pub fn num_samples(&self) -> usize {
        self.samples.lock().len()
    }

    /// Hands a discovered key to the key consumer.
    pub fn emit_key(&self, key: &PartialKey) {
        let mut consumer = self.on_key.lock();
        (*consumer)(key);
    }

    /// Hands a discovered FD to the FD consumer.
    pub fn emit_fd(&self, fd: &PartialFd) {
        let mut consumer = self.on_fd.lock();
        (*consumer)(fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    fn relation() -> ColumnLayoutRelation {
        let rows = (0..40).map(|i| {
            vec![
                Some(format!("{}", i % 4)),
                Some(format!("{}", i % 2)),
                Some("same".to_owned()),
            ]
        });
        ColumnLayoutRelation::from_rows("t", vec!["a", "b", "c"], rows, true).unwrap()
    }

    #[test]
    fn zero_entropy_column_does_not_break_sizing() {
        let rows = vec![vec![Some("x")], vec![Some("x")], vec![Some("x")]];
        let relation = ColumnLayoutRelation::from_rows("t", vec!["c"], rows, true).unwrap();
        let settings = Configuration::default().validate().unwrap();
        let ctx = ProfilingContext::new(settings, &relation, |_| {}, |_| {}).unwrap();
        assert_eq!(ctx.entropy_statistics().maximum, 0.0);
        assert_eq!(ctx.sample_target_size(1.0), 10_000);
        assert!(ctx.agree_set_sample(&Vertical::single(0)).unwrap().is_exact());
    }

    #[test]
    fn best_sample_prefers_higher_ratio() {
        let relation = relation();
        let mut config = Configuration::default();
        config.sample_size = 10;
        let ctx = ProfilingContext::new(config.validate().unwrap(), &relation, |_| {}, |_| {})
            .unwrap();
        assert_eq!(ctx.num_samples(), 3);

        let ab = Vertical::new(&[0, 1]);
        let before = ctx.agree_set_sample(&ab).unwrap();
        assert!(!before.is_exact());
        assert!(ctx.should_resample(&ab, 20.0));

        let focused = ctx.create_focused_sample(&ab, 20.0);
        assert!(focused.is_exact());
        let after = ctx.agree_set_sample(&ab).unwrap();
        assert_eq!(after.focus(), &ab);
        assert!(!ctx.should_resample(&ab, 20.0));
    }

    #[test]
    fn concurrent_sample_requests_share_one_build() {
        let relation = relation();
        let mut config = Configuration::default();
        config.sample_size = 10;
        let ctx = ProfilingContext::new(config.validate().unwrap(), &relation, |_| {}, |_| {})
            .unwrap();
        let ab = Vertical::new(&[0, 1]);
        let misses = ctx.partition_cache().stats().misses;

        let (shared, focus) = (&ctx, &ab);
        let samples: Vec<Arc<AgreeSetSample>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(move || shared.create_focused_sample(focus, 20.0)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for sample in samples.iter() {
            assert!(Arc::ptr_eq(sample, &samples[0]));
        }
        assert_eq!(samples[0].focus(), &ab);
        assert_eq!(ctx.num_samples(), 4);
        assert_eq!(ctx.partition_cache().stats().misses, misses + 1);
    }

    #[test]
    fn mismatched_null_policy_is_rejected() {
        let relation = relation();
        let mut config = Configuration::default();
        config.is_null_equal_null = false;
        let err = ProfilingContext::new(config.validate().unwrap(), &relation, |_| {}, |_| {});
        assert_eq!(
            err.err(),
            Some(ProfilingError::NullPolicyMismatch {
                relation: true,
                configured: false
            })
        );
    }

    #[test]
    fn seeded_generators_repeat() {
        let relation = relation();
        let draw = || {
            let settings = Configuration::default().validate().unwrap();
            let ctx = ProfilingContext::new(settings, &relation, |_| {}, |_| {}).unwrap();
            (0..8).map(|_| ctx.next_int(1000)).collect::<Vec<_>>()
        };
        assert_eq!(draw(), draw());
    }
}

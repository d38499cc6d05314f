//! Runs a complete profiling job: one search space for keys and one per FD right-hand side.

use crate::config::{Configuration, ErrorMeasure};
use crate::context::ProfilingContext;
use crate::error::{ProfilingError, Result};
use crate::relation::ColumnLayoutRelation;
use crate::search::SearchSpace;
use crate::strategy::{
    DependencyStrategy, FdStrategy, KeyStrategy, PartialFd, PartialKey, Target,
};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, instrument};

/// Timings and counters of a run.
///
/// Everything but the durations is reproducible: the same input, configuration and seed
/// always give the same counts and checksum.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct Diagnostics {
    /// Time spent building the context and the search spaces.
    pub init_time: Duration,
    /// Time spent searching.
    pub search_time: Duration,
    /// Time spent ascending, summed over all search spaces.
    pub ascension_time: Duration,
    /// Time spent trickling down, summed over all search spaces.
    pub trickle_time: Duration,
    /// Exact error computations, summed over all search spaces.
    pub error_calculations: u64,
    /// Partition intersections performed by the cache.
    pub intersections: u64,
    /// Number of keys found.
    pub num_keys: usize,
    /// Number of FDs found.
    pub num_fds: usize,
    /// Fletcher-16 checksum over the sorted textual rendering of every dependency found.
    pub checksum: u16,
}

/// Everything a run discovered.
#[derive(Clone, Debug)]
pub struct ProfilingResult {
    /// Minimal approximate keys, in discovery order.
    pub keys: Vec<PartialKey>,
    /// Minimal approximate FDs, in discovery order.
    pub fds: Vec<PartialFd>,
    /// Timings and counters.
    pub diagnostics: Diagnostics,
}

/// The Fletcher-16 checksum of `data`.
///
/// ```
/// assert_eq!(pyro_profiler::fletcher16(b"abcde"), 0xC8F0);
/// assert_eq!(pyro_profiler::fletcher16(b"abcdef"), 0x2057);
/// ```
pub fn fletcher16(data: &[u8]) -> u16 {
    let mut sum1: u16 = 0;
    let mut sum2: u16 = 0;
    for &byte in data {
        sum1 = (sum1 + u16::from(byte)) % 255;
        sum2 = (sum2 + sum1) % 255;
    }
    (sum2 << 8) | sum1
}

/// Discovers approximate keys and FDs in a relation.
///
/// ```
/// use pyro_profiler::{ColumnLayoutRelation, Configuration, Profiler};
///
/// let rows = vec![
///     vec![Some("1"), Some("red")],
///     vec![Some("2"), Some("red")],
///     vec![Some("3"), Some("blue")],
/// ];
/// let relation = ColumnLayoutRelation::from_rows("t", vec!["id", "color"], rows, true).unwrap();
/// let mut config = Configuration::default();
/// config.max_ucc_error = 0.0;
/// config.max_fd_error = 0.0;
///
/// let result = Profiler::new(config).execute(&relation).unwrap();
/// let keys: Vec<_> = result.keys.iter().map(|k| k.describe(relation.schema())).collect();
/// assert_eq!(keys, vec!["key [id] (error 0.000000)"]);
/// assert_eq!(result.fds.len(), 1);
/// assert_eq!(result.fds[0].describe(relation.schema()), "fd [id] -> color (error 0.000000)");
/// ```
#[derive(Clone, Debug, Default)]
pub struct Profiler {
    config: Configuration,
}

impl Profiler {
    /// A profiler running with `config`.
    pub fn new(config: Configuration) -> Self {
        Profiler { config }
    }

    /// The configuration this profiler runs with.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Runs discovery and collects everything found.
    pub fn execute(&self, relation: &ColumnLayoutRelation) -> Result<ProfilingResult> {
        let mut keys = Vec::new();
        let mut fds = Vec::new();
        let diagnostics = self.execute_with(
            relation,
            |key| keys.push(key.clone()),
            |fd| fds.push(fd.clone()),
        )?;
        Ok(ProfilingResult {
            keys,
            fds,
            diagnostics,
        })
    }

    /// Runs discovery, handing each minimal dependency to the matching consumer as soon as it
    /// is found.
    ///
    /// The configuration is validated and the relation checked before anything else happens,
    /// so errors are reported without any partial output.
    #[instrument(skip_all, fields(relation = relation.schema().name()))]
    pub fn execute_with<'a>(
        &self,
        relation: &'a ColumnLayoutRelation,
        mut on_key: impl FnMut(&PartialKey) + Send + 'a,
        mut on_fd: impl FnMut(&PartialFd) + Send + 'a,
    ) -> Result<Diagnostics> {
        let settings = self.config.clone().validate()?;
        if relation.is_empty() {
            return Err(ProfilingError::EmptyRelation);
        }

        let started = Instant::now();
        let schema = relation.schema();
        let rendered = Mutex::new(Vec::new());
        let ctx = ProfilingContext::new(
            settings,
            relation,
            |key: &PartialKey| {
                rendered.lock().push(key.describe(schema));
                on_key(key);
            },
            |fd: &PartialFd| {
                rendered.lock().push(fd.describe(schema));
                on_fd(fd);
            },
        )?;

        let order = ctx.settings().launch_pad_order;
        let mut spaces = Vec::new();
        if ctx.settings().is_find_keys {
            let strategy: Box<dyn DependencyStrategy> = match ctx.settings().ucc_error_measure {
                ErrorMeasure::G1Prime => Box::new(KeyStrategy::new(&ctx)),
            };
            spaces.push(SearchSpace::new(spaces.len(), strategy, order));
        }
        if ctx.settings().is_find_fds {
            for rhs in 0..relation.num_columns() {
                let strategy: Box<dyn DependencyStrategy> = match ctx.settings().fd_error_measure {
                    ErrorMeasure::G1Prime => Box::new(FdStrategy::new(&ctx, rhs)),
                };
                spaces.push(SearchSpace::new(spaces.len(), strategy, order));
            }
        }
        for space in spaces.iter_mut() {
            space.ensure_initialized(&ctx);
        }

        let mut diagnostics = Diagnostics {
            init_time: started.elapsed(),
            ..Diagnostics::default()
        };
        info!(
            spaces = spaces.len(),
            samples = ctx.num_samples(),
            init_ms = diagnostics.init_time.as_millis() as u64,
            "initialized search spaces"
        );

        let searching = Instant::now();
        for space in spaces.iter_mut() {
            space.discover(&ctx);
            let stats = space.stats();
            diagnostics.ascension_time += stats.ascension_time;
            diagnostics.trickle_time += stats.trickle_time;
            diagnostics.error_calculations += stats.error_calculations;
            let found = space.min_dependencies().len();
            match space.strategy().target() {
                Target::Key => diagnostics.num_keys += found,
                Target::Fd { .. } => diagnostics.num_fds += found,
            }
        }
        diagnostics.search_time = searching.elapsed();
        diagnostics.intersections = ctx.partition_cache().stats().intersections;
        drop(ctx);

        let mut rendered = rendered.into_inner();
        rendered.sort_unstable();
        diagnostics.checksum = fletcher16(rendered.join("\n").as_bytes());

        info!(
            keys = diagnostics.num_keys,
            fds = diagnostics.num_fds,
            error_calculations = diagnostics.error_calculations,
            intersections = diagnostics.intersections,
            checksum = diagnostics.checksum,
            search_ms = diagnostics.search_time.as_millis() as u64,
            "profiling finished"
        );
        Ok(diagnostics)
    }
}

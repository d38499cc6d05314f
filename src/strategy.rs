//! What a search space is looking for: the target dependency kind and how to measure its
//! error, plus the dependencies it reports.

use crate::candidate::DependencyCandidate;
use crate::context::ProfilingContext;
use crate::partition::Partition;
use crate::sample::ConfidenceInterval;
use crate::vertical::{RelationalSchema, Vertical};
use std::collections::HashMap;
use std::fmt;

/// The kind of dependency a search space discovers.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Target {
    /// Unique column combinations.
    Key,
    /// Functional dependencies onto the given column.
    Fd {
        /// The right-hand side column.
        rhs: usize,
    },
}

/// A discovered approximate unique column combination.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialKey {
    /// The columns of the key.
    pub vertical: Vertical,
    /// The exact g1' error.
    pub error: f64,
    /// Ranking score; lower is better. Currently the error itself.
    pub score: f64,
}

/// A discovered approximate functional dependency `lhs → rhs`.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialFd {
    /// The determining columns.
    pub lhs: Vertical,
    /// The determined column.
    pub rhs: usize,
    /// The exact g1' error.
    pub error: f64,
    /// Ranking score; lower is better. Currently the error itself.
    pub score: f64,
}

impl PartialKey {
    /// Renders the key with column names from `schema`.
    ///
    /// ```
    /// use pyro_profiler::{PartialKey, RelationalSchema, Vertical};
    ///
    /// let schema = RelationalSchema::new("t", vec!["id", "name"]);
    /// let key = PartialKey { vertical: Vertical::single(0), error: 0.0, score: 0.0 };
    /// assert_eq!(key.describe(&schema), "key [id] (error 0.000000)");
    /// ```
    pub fn describe(&self, schema: &RelationalSchema) -> String {
        format!("key {} (error {:.6})", schema.format(&self.vertical), self.error)
    }
}

impl PartialFd {
    /// Renders the dependency with column names from `schema`.
    pub fn describe(&self, schema: &RelationalSchema) -> String {
        let rhs = schema.column(self.rhs).map_or("?", |c| c.name());
        format!(
            "fd {} -> {} (error {:.6})",
            schema.format(&self.lhs),
            rhs,
            self.error
        )
    }
}

/// Measures the error of candidates for one dependency target.
///
/// A search space only ever talks to its strategy through this trait, so the search is the
/// same for keys and FDs and for any error measure.
pub trait DependencyStrategy: Send + fmt::Debug {
    /// What this strategy looks for.
    fn target(&self) -> Target;

    /// The columns candidates are drawn from.
    fn scope(&self) -> &Vertical;

    /// The largest error a dependency may have.
    fn max_error(&self) -> f64;

    /// Extra margin an estimate's lower bound must clear before it alone may rule out a
    /// candidate.
    fn error_dev(&self) -> f64;

    /// The largest candidate arity to explore.
    fn max_arity(&self) -> usize;

    /// Estimates the error of `vertical`, exactly when that is cheap.
    fn estimate_error(
        &self,
        ctx: &ProfilingContext<'_>,
        vertical: &Vertical,
    ) -> DependencyCandidate;

    /// Computes the exact error of `vertical`.
    fn exact_error(&self, ctx: &ProfilingContext<'_>, vertical: &Vertical) -> f64;

    /// Reports a minimal dependency to the context's consumer.
    fn register(&self, ctx: &ProfilingContext<'_>, vertical: &Vertical, error: f64);

    /// Whether an exact `error` makes a dependency.
    fn is_satisfied(&self, error: f64) -> bool {
        error <= self.max_error()
    }

    /// Whether `estimate` rules out a dependency with enough confidence to skip the exact
    /// computation.
    fn is_confident_violation(&self, estimate: &ConfidenceInterval) -> bool {
        estimate.min > self.max_error() + self.error_dev()
    }
}

fn pairs(n: usize) -> u64 {
    let n = n as u64;
    n * n.saturating_sub(1) / 2
}

fn ratio(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn uninformed(vertical: &Vertical) -> DependencyCandidate {
    DependencyCandidate::new(vertical.clone(), ConfidenceInterval::new(0.0, 0.5, 1.0), false)
}

/// Finds approximate unique column combinations under the g1' measure: the fraction of all
/// row pairs that agree on every column of the candidate.
#[derive(Clone, Debug)]
pub struct KeyStrategy {
    scope: Vertical,
    max_error: f64,
    error_dev: f64,
    max_arity: usize,
}

impl KeyStrategy {
    /// A key strategy over every column of the context's relation.
    pub fn new(ctx: &ProfilingContext<'_>) -> Self {
        let scope = ctx.relation().schema().full_vertical();
        let settings = ctx.settings();
        KeyStrategy {
            max_arity: settings.max_arity(scope.arity()),
            scope,
            max_error: settings.max_ucc_error,
            error_dev: settings.error_dev,
        }
    }
}

impl DependencyStrategy for KeyStrategy {
    fn target(&self) -> Target {
        Target::Key
    }

    fn scope(&self) -> &Vertical {
        &self.scope
    }

    fn max_error(&self) -> f64 {
        self.max_error
    }

    fn error_dev(&self) -> f64 {
        self.error_dev
    }

    fn max_arity(&self) -> usize {
        self.max_arity
    }

    fn estimate_error(
        &self,
        ctx: &ProfilingContext<'_>,
        vertical: &Vertical,
    ) -> DependencyCandidate {
        let total = ctx.relation().num_tuple_pairs();
        if let Some(partition) = ctx.partition_cache().peek(vertical) {
            return DependencyCandidate::exact(vertical.clone(), ratio(partition.nep(), total));
        }
        match ctx.agree_set_sample(vertical) {
            Some(sample) => DependencyCandidate::new(
                vertical.clone(),
                sample.estimate_agreements(vertical, ctx.z_score()),
                false,
            ),
            None => uninformed(vertical),
        }
    }

    fn exact_error(&self, ctx: &ProfilingContext<'_>, vertical: &Vertical) -> f64 {
        let partition = ctx.partition_cache().get_or_build(vertical);
        ratio(partition.nep(), ctx.relation().num_tuple_pairs())
    }

    fn register(&self, ctx: &ProfilingContext<'_>, vertical: &Vertical, error: f64) {
        ctx.emit_key(&PartialKey {
            vertical: vertical.clone(),
            error,
            score: error,
        });
    }
}

/// Finds approximate functional dependencies onto one column under the g1' measure: the
/// fraction of all row pairs that agree on the left-hand side but not on the right-hand
/// side.
#[derive(Clone, Debug)]
pub struct FdStrategy {
    rhs: usize,
    rhs_vertical: Vertical,
    scope: Vertical,
    max_error: f64,
    error_dev: f64,
    max_arity: usize,
}

/// Counts the row pairs that share a class of `lhs` but differ under `rhs_probe`.
///
/// ```
/// use pyro_profiler::{violating_pairs, Partition};
///
/// let lhs = Partition::from_values(vec![Some(0), Some(0), Some(0), Some(1), Some(1)]);
/// let rhs = Partition::from_values(vec![Some(5), Some(5), Some(6), Some(7), None]);
/// // (0,2), (1,2) and (3,4) disagree on the right-hand side.
/// assert_eq!(violating_pairs(&lhs, &rhs.probing_table()), 3);
/// ```
pub fn violating_pairs(lhs: &Partition, rhs_probe: &[u32]) -> u64 {
    let mut groups: HashMap<u32, usize> = HashMap::new();
    let mut violations = 0;
    for class in lhs.classes().iter() {
        for &row in class.iter() {
            let id = rhs_probe[row as usize];
            if id != 0 {
                *groups.entry(id).or_insert(0) += 1;
            }
        }
        let agreeing: u64 = groups.drain().map(|(_, n)| pairs(n)).sum();
        violations += pairs(class.len()) - agreeing;
    }
    violations
}

impl FdStrategy {
    /// An FD strategy for `rhs`, over every other column of the context's relation.
    pub fn new(ctx: &ProfilingContext<'_>, rhs: usize) -> Self {
        let scope = ctx.relation().schema().full_vertical().without_column(rhs);
        let settings = ctx.settings();
        FdStrategy {
            rhs,
            rhs_vertical: Vertical::single(rhs),
            max_arity: settings.max_arity(scope.arity()),
            scope,
            max_error: settings.max_fd_error,
            error_dev: settings.error_dev,
        }
    }

    fn error_of(&self, ctx: &ProfilingContext<'_>, lhs: &Partition) -> f64 {
        let probe = ctx.relation().column(self.rhs).probing_table();
        ratio(violating_pairs(lhs, probe), ctx.relation().num_tuple_pairs())
    }
}

impl DependencyStrategy for FdStrategy {
    fn target(&self) -> Target {
        Target::Fd { rhs: self.rhs }
    }

    fn scope(&self) -> &Vertical {
        &self.scope
    }

    fn max_error(&self) -> f64 {
        self.max_error
    }

    fn error_dev(&self) -> f64 {
        self.error_dev
    }

    fn max_arity(&self) -> usize {
        self.max_arity
    }

    fn estimate_error(
        &self,
        ctx: &ProfilingContext<'_>,
        vertical: &Vertical,
    ) -> DependencyCandidate {
        if let Some(partition) = ctx.partition_cache().peek(vertical) {
            return DependencyCandidate::exact(vertical.clone(), self.error_of(ctx, &partition));
        }
        match ctx.agree_set_sample(vertical) {
            Some(sample) => DependencyCandidate::new(
                vertical.clone(),
                sample.estimate_mixed(vertical, &self.rhs_vertical, ctx.z_score()),
                false,
            ),
            None => uninformed(vertical),
        }
    }

    fn exact_error(&self, ctx: &ProfilingContext<'_>, vertical: &Vertical) -> f64 {
        let partition = ctx.partition_cache().get_or_build(vertical);
        self.error_of(ctx, &partition)
    }

    fn register(&self, ctx: &ProfilingContext<'_>, vertical: &Vertical, error: f64) {
        ctx.emit_fd(&PartialFd {
            lhs: vertical.clone(),
            rhs: self.rhs,
            error,
            score: error,
        });
    }
}

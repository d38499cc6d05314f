//! The lattice search for one dependency target.
//!
//! A search space starts from *launch pads*, small verticals on the frontier of what is known.
//! From each it *ascends* the lattice, adding one column at a time along the smallest
//! estimated error, until it hits a dependency. It then *trickles down* from that dependency
//! to the minimal dependencies below it, verifying every step exactly. Everything learned
//! along the way, minimal dependencies and maximal non-dependencies, prunes the rest of the
//! lattice, and launch pads that end up underneath known non-dependencies are *escaped*:
//! replaced by their smallest supersets that are not.

use crate::candidate::{DependencyCandidate, LaunchPadOrder};
use crate::context::ProfilingContext;
use crate::strategy::{DependencyStrategy, Target};
use crate::vertical::{Vertical, VerticalMap};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// What a search space knows about one vertical.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeState {
    /// A minimal dependency that has been reported.
    Dependency,
    /// A recorded maximal non-dependency.
    NonDependency,
    /// Decided by something else: a strict superset of a dependency, a strict subset of a
    /// non-dependency, or too wide to be explored.
    Pruned,
    /// Nothing is known yet.
    Unclassified,
}

/// Counters and timers of one search space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct SearchStats {
    /// Exact error computations.
    pub error_calculations: u64,
    /// Launch pads ascended from.
    pub launch_pads_processed: u64,
    /// Launch pads replaced by escaping.
    pub escapes: u64,
    /// Time spent ascending.
    pub ascension_time: Duration,
    /// Time spent trickling down.
    pub trickle_time: Duration,
}

/// Computes the minimal sets that intersect every one of `sets`.
///
/// ```
/// use pyro_profiler::{minimal_hitting_sets, Vertical};
///
/// let sets = [Vertical::new(&[0, 1]), Vertical::new(&[1, 2])];
/// let mut hitting = minimal_hitting_sets(&sets);
/// hitting.sort();
/// let mut expected = vec![Vertical::single(1), Vertical::new(&[0, 2])];
/// expected.sort();
/// assert_eq!(hitting, expected);
/// ```
pub fn minimal_hitting_sets(sets: &[Vertical]) -> Vec<Vertical> {
    let mut ordered: Vec<&Vertical> = sets.iter().collect();
    ordered.sort_by(|a, b| a.arity().cmp(&b.arity()).then(a.cmp(b)));

    let mut hitting = vec![Vertical::empty()];
    for set in ordered {
        let mut next = Vec::with_capacity(hitting.len());
        for partial in hitting {
            if partial.intersects(set) {
                next.push(partial);
            } else {
                next.extend(set.iter().map(|column| partial.with_column(column)));
            }
        }
        next.sort_by(|a, b| a.arity().cmp(&b.arity()).then(a.cmp(b)));
        next.dedup();

        let mut minimal: Vec<Vertical> = Vec::with_capacity(next.len());
        for candidate in next {
            if !minimal.iter().any(|kept| kept.is_subset(&candidate)) {
                minimal.push(candidate);
            }
        }
        hitting = minimal;
    }
    hitting
}

/// The search for all minimal dependencies of one strategy.
pub struct SearchSpace {
    id: usize,
    strategy: Box<dyn DependencyStrategy>,
    order: LaunchPadOrder,
    launch_pads: Vec<DependencyCandidate>,
    enqueued: HashSet<Vertical>,
    min_deps: VerticalMap<f64>,
    max_non_deps: VerticalMap<()>,
    errors: HashMap<Vertical, f64>,
    initialized: bool,
    stats: SearchStats,
}

impl std::fmt::Debug for SearchSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchSpace")
            .field("id", &self.id)
            .field("strategy", &self.strategy)
            .field("launch_pads", &self.launch_pads.len())
            .field("min_deps", &self.min_deps.len())
            .field("max_non_deps", &self.max_non_deps.len())
            .finish()
    }
}

impl SearchSpace {
    /// A search space driven by `strategy`, taking launch pads up in `order`.
    pub fn new(id: usize, strategy: Box<dyn DependencyStrategy>, order: LaunchPadOrder) -> Self {
        SearchSpace {
            id,
            strategy,
            order,
            launch_pads: Vec::new(),
            enqueued: HashSet::new(),
            min_deps: VerticalMap::new(),
            max_non_deps: VerticalMap::new(),
            errors: HashMap::new(),
            initialized: false,
            stats: SearchStats::default(),
        }
    }

    /// This space's position among the run's search spaces.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The strategy this space searches with.
    pub fn strategy(&self) -> &dyn DependencyStrategy {
        &*self.strategy
    }

    /// Counters and timers so far.
    pub fn stats(&self) -> SearchStats {
        self.stats
    }

    /// The minimal dependencies found so far, ordered by vertical.
    pub fn min_dependencies(&self) -> Vec<(Vertical, f64)> {
        let mut found: Vec<_> = self.min_deps.iter().map(|(k, &e)| (k.clone(), e)).collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    /// The maximal non-dependencies recorded so far, ordered by vertical.
    pub fn max_non_dependencies(&self) -> Vec<Vertical> {
        let mut found: Vec<_> = self.max_non_deps.keys().cloned().collect();
        found.sort();
        found
    }

    /// Returns `true` once there are no launch pads left after initialization.
    pub fn is_finished(&self) -> bool {
        self.initialized && self.launch_pads.is_empty()
    }

    /// Classifies `vertical` by what has been learned so far.
    pub fn node_state(&self, vertical: &Vertical) -> NodeState {
        debug_assert!(vertical.is_subset(self.strategy.scope()));
        if self.min_deps.contains_key(vertical) {
            NodeState::Dependency
        } else if self.min_deps.any_subset_of(vertical) {
            NodeState::Pruned
        } else if self.max_non_deps.contains_key(vertical) {
            NodeState::NonDependency
        } else if self.max_non_deps.any_superset_of(vertical)
            || vertical.arity() > self.strategy.max_arity()
        {
            NodeState::Pruned
        } else {
            NodeState::Unclassified
        }
    }

    /// Sets up the launch pads. Does nothing if already done.
    ///
    /// The empty vertical is checked first; if it is already a dependency, it is the only
    /// minimal one. A key search also checks the whole scope, since if that isn't a key,
    /// nothing is.
    pub fn ensure_initialized(&mut self, ctx: &ProfilingContext<'_>) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        let empty = Vertical::empty();
        let error = self.exact_error(ctx, &empty);
        if self.strategy.is_satisfied(error) {
            self.register(ctx, empty, error);
            return;
        }
        self.record_non_dependency(empty);

        let scope = self.strategy.scope().clone();
        if self.strategy.target() == Target::Key
            && !scope.is_empty()
            && scope.arity() <= self.strategy.max_arity()
        {
            let error = self.exact_error(ctx, &scope);
            if !self.strategy.is_satisfied(error) {
                debug!(space = self.id, "no key exists at all");
                self.record_non_dependency(scope);
                return;
            }
        }

        if self.strategy.max_arity() >= 1 {
            for column in scope.iter() {
                let vertical = Vertical::single(column);
                self.enqueued.insert(vertical.clone());
                let candidate = self.strategy.estimate_error(ctx, &vertical);
                self.launch_pads.push(candidate);
            }
        }
        debug!(
            space = self.id,
            target = ?self.strategy.target(),
            launch_pads = self.launch_pads.len(),
            "search space initialized"
        );
    }

    /// Runs the search to completion, reporting every minimal dependency through the
    /// strategy.
    pub fn discover(&mut self, ctx: &ProfilingContext<'_>) {
        self.ensure_initialized(ctx);
        while let Some(launch_pad) = self.poll_launch_pad(ctx) {
            self.stats.launch_pads_processed += 1;
            trace!(space = self.id, vertical = ?launch_pad.vertical, "launch pad");
            self.ascend(ctx, &launch_pad);
            if !self.min_deps.any_subset_of(&launch_pad.vertical) {
                self.launch_pads.push(launch_pad);
            }
        }
        debug!(
            space = self.id,
            dependencies = self.min_deps.len(),
            non_dependencies = self.max_non_deps.len(),
            error_calculations = self.stats.error_calculations,
            "search space finished"
        );
    }

    fn exact_error(&mut self, ctx: &ProfilingContext<'_>, vertical: &Vertical) -> f64 {
        if let Some(&error) = self.errors.get(vertical) {
            return error;
        }
        self.stats.error_calculations += 1;
        let error = self.strategy.exact_error(ctx, vertical);
        self.errors.insert(vertical.clone(), error);
        error
    }

    fn settle(&mut self, ctx: &ProfilingContext<'_>, candidate: &DependencyCandidate) -> f64 {
        if candidate.is_exact {
            *self
                .errors
                .entry(candidate.vertical.clone())
                .or_insert(candidate.error.mean)
        } else {
            self.exact_error(ctx, &candidate.vertical)
        }
    }

    fn is_known_non_dependency(&self, vertical: &Vertical) -> bool {
        self.max_non_deps.any_superset_of(vertical)
    }

    fn record_non_dependency(&mut self, vertical: Vertical) {
        if self.max_non_deps.any_superset_of(&vertical) {
            return;
        }
        self.max_non_deps.remove_subsets_of(&vertical);
        self.max_non_deps.insert(vertical, ());
    }

    fn register(&mut self, ctx: &ProfilingContext<'_>, vertical: Vertical, error: f64) {
        debug!(space = self.id, ?vertical, error, "minimal dependency");
        self.launch_pads
            .retain(|pad| !pad.vertical.is_superset(&vertical));
        self.strategy.register(ctx, &vertical, error);
        self.min_deps.insert(vertical, error);
    }

    fn poll_launch_pad(&mut self, ctx: &ProfilingContext<'_>) -> Option<DependencyCandidate> {
        loop {
            let order = self.order;
            let best = self
                .launch_pads
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| order.compare(a, b))
                .map(|(index, _)| index)?;
            let launch_pad = self.launch_pads.swap_remove(best);

            if self.min_deps.any_subset_of(&launch_pad.vertical) {
                continue;
            }
            let covering: Vec<Vertical> = self
                .max_non_deps
                .superset_entries(&launch_pad.vertical)
                .into_iter()
                .map(|(k, _)| k.clone())
                .collect();
            if covering.is_empty() {
                return Some(launch_pad);
            }
            self.escape(ctx, &launch_pad.vertical, &covering);
        }
    }

    /// Replaces a launch pad lying under the non-dependencies in `covering` by its minimal
    /// supersets that lie under none of them.
    fn escape(&mut self, ctx: &ProfilingContext<'_>, launch_pad: &Vertical, covering: &[Vertical]) {
        self.stats.escapes += 1;
        let scope = self.strategy.scope().clone();
        let complements: Vec<Vertical> = covering
            .iter()
            .map(|non_dep| non_dep.complement_within(&scope))
            .collect();

        for hitting_set in minimal_hitting_sets(&complements) {
            let escaped = launch_pad.union(&hitting_set);
            if escaped.arity() > self.strategy.max_arity()
                || self.min_deps.any_subset_of(&escaped)
                || !self.enqueued.insert(escaped.clone())
            {
                continue;
            }
            trace!(space = self.id, from = ?launch_pad, to = ?escaped, "escaped launch pad");
            let candidate = self.strategy.estimate_error(ctx, &escaped);
            self.launch_pads.push(candidate);
        }
    }

    fn ascend(&mut self, ctx: &ProfilingContext<'_>, launch_pad: &DependencyCandidate) {
        let started = Instant::now();
        let booster = ctx.settings().sample_booster;
        let mut current = launch_pad.clone();
        if ctx.should_resample(&current.vertical, booster) {
            ctx.create_focused_sample(&current.vertical, booster);
            current = self.strategy.estimate_error(ctx, &current.vertical);
        }

        let mut found = None;
        loop {
            if !self.is_known_non_dependency(&current.vertical)
                && (current.is_exact || !self.strategy.is_confident_violation(&current.error))
            {
                let error = self.settle(ctx, &current);
                if self.strategy.is_satisfied(error) {
                    found = Some((current.vertical.clone(), error));
                    break;
                }
                self.record_non_dependency(current.vertical.clone());
            }
            if current.arity() >= self.strategy.max_arity() {
                break;
            }

            let scope = self.strategy.scope();
            let mut next: Option<(bool, DependencyCandidate)> = None;
            for child in current.vertical.children_within(scope) {
                if self.min_deps.any_subset_of(&child) {
                    continue;
                }
                let known = self.is_known_non_dependency(&child);
                let candidate = self.strategy.estimate_error(ctx, &child);
                let better = match &next {
                    None => true,
                    Some((best_known, best)) => known
                        .cmp(best_known)
                        .then(candidate.error.mean.total_cmp(&best.error.mean))
                        .then_with(|| candidate.vertical.cmp(&best.vertical))
                        .is_lt(),
                };
                if better {
                    next = Some((known, candidate));
                }
            }
            match next {
                Some((_, candidate)) => current = candidate,
                None => break,
            }
        }

        if found.is_none() && !self.is_known_non_dependency(&current.vertical) {
            let error = self.exact_error(ctx, &current.vertical);
            if self.strategy.is_satisfied(error) {
                found = Some((current.vertical.clone(), error));
            } else {
                self.record_non_dependency(current.vertical.clone());
            }
        }
        self.stats.ascension_time += started.elapsed();

        if let Some((peak, error)) = found {
            trace!(space = self.id, ?peak, error, "ascended to dependency");
            self.trickle_down(ctx, peak);
        }
    }

    /// Finds every minimal dependency below `peak`, a verified dependency.
    fn trickle_down(&mut self, ctx: &ProfilingContext<'_>, peak: Vertical) {
        let started = Instant::now();
        let mut peaks = vec![peak];
        let mut visited = HashSet::new();

        while let Some(peak) = peaks.pop() {
            let known = self
                .min_deps
                .subset_entries(&peak)
                .into_iter()
                .map(|(k, _)| k.clone())
                .min_by(|a, b| a.arity().cmp(&b.arity()).then(a.cmp(b)));

            match known {
                Some(known) => {
                    // Everything below `peak` that doesn't contain `known` misses one of its
                    // columns.
                    for column in known.iter() {
                        let lower = peak.without_column(column);
                        if self.is_known_non_dependency(&lower) || !visited.insert(lower.clone()) {
                            continue;
                        }
                        if self.min_deps.any_subset_of(&lower) {
                            peaks.push(lower);
                            continue;
                        }
                        let error = self.exact_error(ctx, &lower);
                        if self.strategy.is_satisfied(error) {
                            peaks.push(lower);
                        } else {
                            self.record_non_dependency(lower);
                        }
                    }
                }
                None => {
                    let (minimal, error) = self.descend(ctx, peak.clone());
                    self.register(ctx, minimal, error);
                    peaks.push(peak);
                }
            }
        }
        self.stats.trickle_time += started.elapsed();
    }

    /// Walks down from a dependency containing no known minimal dependency, one verified
    /// parent at a time, until no parent is a dependency.
    fn descend(&mut self, ctx: &ProfilingContext<'_>, start: Vertical) -> (Vertical, f64) {
        let mut current_error = self.exact_error(ctx, &start);
        let mut current = start;
        loop {
            let mut parents: Vec<DependencyCandidate> = current
                .parents()
                .filter(|parent| !self.is_known_non_dependency(parent))
                .map(|parent| self.strategy.estimate_error(ctx, &parent))
                .collect();
            parents.sort_by(|a, b| {
                a.error
                    .mean
                    .total_cmp(&b.error.mean)
                    .then_with(|| a.vertical.cmp(&b.vertical))
            });

            let mut next = None;
            for parent in parents {
                let error = self.settle(ctx, &parent);
                if self.strategy.is_satisfied(error) {
                    next = Some((parent.vertical, error));
                    break;
                }
                self.record_non_dependency(parent.vertical);
            }
            match next {
                Some((vertical, error)) => {
                    current = vertical;
                    current_error = error;
                }
                None => return (current, current_error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::relation::ColumnLayoutRelation;
    use crate::strategy::{FdStrategy, KeyStrategy};

    fn all_verticals(scope: &Vertical) -> Vec<Vertical> {
        let columns: Vec<usize> = scope.iter().collect();
        (0u32..1 << columns.len())
            .map(|bits| {
                columns
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| bits & (1 << i) != 0)
                    .map(|(_, &c)| c)
                    .collect()
            })
            .collect()
    }

    fn relation() -> ColumnLayoutRelation {
        let rows = vec![
            ["1", "a", "x", "p"],
            ["2", "a", "x", "p"],
            ["3", "b", "x", "q"],
            ["4", "b", "y", "q"],
            ["5", "c", "y", "p"],
            ["6", "c", "y", "p"],
        ];
        ColumnLayoutRelation::from_rows(
            "t",
            vec!["id", "group", "flag", "kind"],
            rows.into_iter().map(|row| row.map(Some)),
            true,
        )
        .unwrap()
    }

    #[test]
    fn hitting_sets_of_nothing_is_the_empty_set() {
        assert_eq!(minimal_hitting_sets(&[]), vec![Vertical::empty()]);
        assert!(minimal_hitting_sets(&[Vertical::empty()]).is_empty());
    }

    #[test]
    fn hitting_sets_are_minimal_and_hit_everything() {
        let sets = [
            Vertical::new(&[0, 1]),
            Vertical::new(&[1, 2]),
            Vertical::new(&[2, 3]),
            Vertical::new(&[0, 3]),
        ];
        let hitting = minimal_hitting_sets(&sets);
        for h in hitting.iter() {
            assert!(sets.iter().all(|s| s.intersects(h)));
            assert!(h.parents().all(|p| !sets.iter().all(|s| s.intersects(&p))));
        }
        let mut hitting = hitting;
        hitting.sort();
        let mut expected = vec![Vertical::new(&[0, 2]), Vertical::new(&[1, 3])];
        expected.sort();
        assert_eq!(hitting, expected);
    }

    #[test]
    fn every_node_is_classified_after_discovery() {
        let relation = relation();
        for max_error in [0.0, 0.1, 0.3] {
            let mut config = Configuration::default();
            config.max_ucc_error = max_error;
            config.max_fd_error = max_error;
            config.sample_size = 4;
            let settings = config.validate().unwrap();
            let ctx = ProfilingContext::new(settings, &relation, |_| {}, |_| {}).unwrap();

            let mut spaces = vec![SearchSpace::new(
                0,
                Box::new(KeyStrategy::new(&ctx)),
                LaunchPadOrder::Error,
            )];
            for rhs in 0..relation.num_columns() {
                spaces.push(SearchSpace::new(
                    rhs + 1,
                    Box::new(FdStrategy::new(&ctx, rhs)),
                    LaunchPadOrder::Arity,
                ));
            }
            for space in spaces.iter_mut() {
                space.discover(&ctx);
                assert!(space.is_finished());
                for vertical in all_verticals(space.strategy().scope()) {
                    let state = space.node_state(&vertical);
                    assert_ne!(state, NodeState::Unclassified, "{:?}", vertical);
                    let error = space.strategy().exact_error(&ctx, &vertical);
                    let satisfied = space.strategy().is_satisfied(error);
                    match state {
                        NodeState::Dependency => assert!(satisfied),
                        NodeState::NonDependency => assert!(!satisfied),
                        _ => {}
                    }
                }
            }
        }
    }

    #[test]
    fn constant_column_is_determined_by_nothing() {
        let rows = vec![
            vec![Some("1"), Some("k")],
            vec![Some("2"), Some("k")],
            vec![Some("3"), Some("k")],
        ];
        let relation = ColumnLayoutRelation::from_rows("t", vec!["a", "b"], rows, true).unwrap();
        let settings = Configuration::default().validate().unwrap();
        let ctx = ProfilingContext::new(settings, &relation, |_| {}, |_| {}).unwrap();
        let strategy = Box::new(FdStrategy::new(&ctx, 1));
        let mut space = SearchSpace::new(0, strategy, LaunchPadOrder::Error);
        space.discover(&ctx);
        assert_eq!(space.min_dependencies(), vec![(Vertical::empty(), 0.0)]);
        assert_eq!(space.node_state(&Vertical::single(0)), NodeState::Pruned);
    }
}

//! The shared cache of intersected partitions, with pluggable admission and eviction.

use crate::error::ProfilingError;
use crate::partition::Partition;
use crate::relation::ColumnLayoutRelation;
use crate::vertical::{Vertical, VerticalMap};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::trace;

/// Decides which freshly computed partitions are worth keeping in the cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CachingMethod {
    /// Keep every partition.
    All,
    /// Keep none; only single-column partitions are ever available.
    Nothing,
    /// Keep each partition with a fixed probability.
    Coin,
    /// Keep partitions whose entropy is at most a fraction of the maximum column entropy.
    Entropy,
}

impl FromStr for CachingMethod {
    type Err = ProfilingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allcaching" => Ok(CachingMethod::All),
            "nocaching" => Ok(CachingMethod::Nothing),
            "coin" => Ok(CachingMethod::Coin),
            "entropy" => Ok(CachingMethod::Entropy),
            _ => Err(ProfilingError::UnknownCachingMethod(s.to_owned())),
        }
    }
}

/// Selects the [`EvictionPolicy`] that bounds the cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvictionMethod {
    /// Never evict.
    Default,
    /// Bound the number of entries, evicting the least recently used.
    Lru,
    /// Bound the total number of row positions held, evicting the least recently used.
    Size,
}

impl FromStr for EvictionMethod {
    type Err = ProfilingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(EvictionMethod::Default),
            "lru" => Ok(EvictionMethod::Lru),
            "size" => Ok(EvictionMethod::Size),
            _ => Err(ProfilingError::UnknownEvictionMethod(s.to_owned())),
        }
    }
}

/// Tracks cache entries and decides which ones to drop when the cache grows too large.
///
/// The cache calls these hooks while holding its lock, so implementations never see
/// concurrent calls.
pub trait EvictionPolicy: Send {
    /// A partition was added under `vertical`.
    fn on_insert(&mut self, vertical: &Vertical, partition: &Partition);
    /// The entry for `vertical` was read.
    fn on_access(&mut self, vertical: &Vertical);
    /// The entry for `vertical` was dropped by someone other than this policy.
    fn on_remove(&mut self, vertical: &Vertical);
    /// Picks entries to drop now, forgetting them. Called after every insertion.
    fn select_victims(&mut self) -> Vec<Vertical>;
}

/// Keeps everything.
#[derive(Debug, Default)]
pub struct NoEviction;

impl EvictionPolicy for NoEviction {
    fn on_insert(&mut self, _: &Vertical, _: &Partition) {}
    fn on_access(&mut self, _: &Vertical) {}
    fn on_remove(&mut self, _: &Vertical) {}
    fn select_victims(&mut self) -> Vec<Vertical> {
        Vec::new()
    }
}

#[derive(Debug, Default)]
struct Recency {
    clock: u64,
    last_used: HashMap<Vertical, u64>,
}

impl Recency {
    fn touch(&mut self, vertical: &Vertical) {
        self.clock += 1;
        if let Some(tick) = self.last_used.get_mut(vertical) {
            *tick = self.clock;
        }
    }

    fn insert(&mut self, vertical: &Vertical) {
        self.clock += 1;
        self.last_used.insert(vertical.clone(), self.clock);
    }

    fn pop_oldest(&mut self) -> Option<Vertical> {
        let oldest = self
            .last_used
            .iter()
            .min_by_key(|(vertical, &tick)| (tick, *vertical))
            .map(|(vertical, _)| vertical.clone())?;
        self.last_used.remove(&oldest);
        Some(oldest)
    }
}

/// Holds at most `capacity` entries, dropping the least recently used ones first.
#[derive(Debug)]
pub struct LeastRecentlyUsed {
    capacity: usize,
    recency: Recency,
}

impl LeastRecentlyUsed {
    /// A policy that keeps up to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        LeastRecentlyUsed {
            capacity,
            recency: Recency::default(),
        }
    }
}

impl EvictionPolicy for LeastRecentlyUsed {
    fn on_insert(&mut self, vertical: &Vertical, _: &Partition) {
        self.recency.insert(vertical);
    }

    fn on_access(&mut self, vertical: &Vertical) {
        self.recency.touch(vertical);
    }

    fn on_remove(&mut self, vertical: &Vertical) {
        self.recency.last_used.remove(vertical);
    }

    fn select_victims(&mut self) -> Vec<Vertical> {
        let mut victims = Vec::new();
        while self.recency.last_used.len() > self.capacity {
            victims.extend(self.recency.pop_oldest());
        }
        victims
    }
}

/// Holds partitions covering at most `max_positions` row positions in total, dropping the
/// least recently used ones first.
#[derive(Debug)]
pub struct BoundedSize {
    max_positions: usize,
    positions: usize,
    sizes: HashMap<Vertical, usize>,
    recency: Recency,
}

impl BoundedSize {
    /// A policy that keeps up to `max_positions` row positions.
    pub fn new(max_positions: usize) -> Self {
        BoundedSize {
            max_positions,
            positions: 0,
            sizes: HashMap::new(),
            recency: Recency::default(),
        }
    }

    fn forget(&mut self, vertical: &Vertical) {
        if let Some(size) = self.sizes.remove(vertical) {
            self.positions -= size;
        }
    }
}

impl EvictionPolicy for BoundedSize {
    fn on_insert(&mut self, vertical: &Vertical, partition: &Partition) {
        self.forget(vertical);
        let size = partition.size();
        self.positions += size;
        self.sizes.insert(vertical.clone(), size);
        self.recency.insert(vertical);
    }

    fn on_access(&mut self, vertical: &Vertical) {
        self.recency.touch(vertical);
    }

    fn on_remove(&mut self, vertical: &Vertical) {
        self.forget(vertical);
        self.recency.last_used.remove(vertical);
    }

    fn select_victims(&mut self) -> Vec<Vertical> {
        let mut victims = Vec::new();
        while self.positions > self.max_positions {
            match self.recency.pop_oldest() {
                Some(oldest) => {
                    self.forget(&oldest);
                    victims.push(oldest);
                }
                None => break,
            }
        }
        victims
    }
}

/// Counters describing how much work the cache has done.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct CacheStats {
    /// Lookups answered by a cached multi-column partition.
    pub hits: u64,
    /// Multi-column partitions that had to be computed.
    pub misses: u64,
    /// Partition intersections performed.
    pub intersections: u64,
}

type Slot = Arc<OnceLock<Arc<Partition>>>;

struct CacheState {
    index: VerticalMap<Arc<Partition>>,
    in_flight: HashMap<Vertical, Slot>,
    policy: Box<dyn EvictionPolicy>,
}

/// Hands out the partition of any vertical, computing it from cached pieces when needed.
///
/// Single-column partitions come straight from the relation and the empty vertical's
/// partition is built once up front; neither is ever evicted. Everything else is computed on
/// demand by intersecting cached partitions of subsets, then kept or discarded according to
/// the [`CachingMethod`]. Lookups return shared snapshots, so eviction never invalidates a
/// partition somebody is still using.
///
/// Concurrent requests for the same uncached vertical compute it only once.
pub struct PartitionCache<'r> {
    relation: &'r ColumnLayoutRelation,
    whole: Arc<Partition>,
    caching_method: CachingMethod,
    caching_value: f64,
    entropy_ceiling: f64,
    random: Arc<Mutex<StdRng>>,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    intersections: AtomicU64,
}

impl<'r> PartitionCache<'r> {
    /// Creates an empty cache over `relation`.
    ///
    /// `caching_value` parameterizes the caching method, and `max_column_entropy` scales it for
    /// [`CachingMethod::Entropy`]. Random admission decisions draw from `random`.
    pub fn new(
        relation: &'r ColumnLayoutRelation,
        caching_method: CachingMethod,
        caching_value: f64,
        max_column_entropy: f64,
        policy: Box<dyn EvictionPolicy>,
        random: Arc<Mutex<StdRng>>,
    ) -> Self {
        PartitionCache {
            relation,
            whole: Arc::new(Partition::whole(relation.num_rows())),
            caching_method,
            caching_value,
            entropy_ceiling: caching_value * max_column_entropy,
            random,
            state: Mutex::new(CacheState {
                index: VerticalMap::new(),
                in_flight: HashMap::new(),
                policy,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            intersections: AtomicU64::new(0),
        }
    }

    /// Builds the eviction policy selected by `method`. A `capacity` of 0 picks a default:
    /// 1024 entries for [`EvictionMethod::Lru`], eight times the relation's cells for
    /// [`EvictionMethod::Size`].
    pub fn policy_for(
        method: EvictionMethod,
        capacity: usize,
        relation: &ColumnLayoutRelation,
    ) -> Box<dyn EvictionPolicy> {
        match method {
            EvictionMethod::Default => Box::new(NoEviction),
            EvictionMethod::Lru => Box::new(LeastRecentlyUsed::new(if capacity == 0 {
                1024
            } else {
                capacity
            })),
            EvictionMethod::Size => Box::new(BoundedSize::new(if capacity == 0 {
                (8 * relation.num_rows() * relation.num_columns()).max(1)
            } else {
                capacity
            })),
        }
    }

    /// Returns the partition of `vertical` if it's available without computing anything.
    pub fn peek(&self, vertical: &Vertical) -> Option<Arc<Partition>> {
        match vertical.arity() {
            0 => Some(self.whole.clone()),
            1 => vertical
                .first()
                .map(|column| self.relation.column(column).partition().clone()),
            _ => {
                let mut state = self.state.lock();
                let found = state.index.get(vertical).cloned();
                if found.is_some() {
                    state.policy.on_access(vertical);
                }
                found
            }
        }
    }

    /// Returns the partition of `vertical`, computing and possibly caching it first.
    pub fn get_or_build(&self, vertical: &Vertical) -> Arc<Partition> {
        if vertical.arity() <= 1 {
            if let Some(partition) = self.peek(vertical) {
                return partition;
            }
        }

        let slot = {
            let mut state = self.state.lock();
            if let Some(found) = state.index.get(vertical).cloned() {
                state.policy.on_access(vertical);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return found;
            }
            state
                .in_flight
                .entry(vertical.clone())
                .or_insert_with(|| Arc::new(OnceLock::new()))
                .clone()
        };

        let mut built_here = false;
        let partition = slot
            .get_or_init(|| {
                built_here = true;
                Arc::new(self.build(vertical))
            })
            .clone();

        if built_here {
            self.misses.fetch_add(1, Ordering::Relaxed);
            let admit = self.admits(&partition);
            let mut state = self.state.lock();
            state.in_flight.remove(vertical);
            if admit {
                if state.index.insert(vertical.clone(), partition.clone()).is_some() {
                    state.policy.on_remove(vertical);
                }
                state.policy.on_insert(vertical, &partition);
                for victim in state.policy.select_victims() {
                    trace!(?victim, "evicting partition");
                    state.index.remove(&victim);
                }
            }
        }
        partition
    }

    fn admits(&self, partition: &Partition) -> bool {
        match self.caching_method {
            CachingMethod::All => true,
            CachingMethod::Nothing => false,
            CachingMethod::Coin => self.random.lock().random::<f64>() < self.caching_value,
            CachingMethod::Entropy => partition.entropy() <= self.entropy_ceiling,
        }
    }

    /// Computes a partition by covering `vertical` greedily with cached subsets: first the
    /// largest one, then whichever covers the most remaining columns. Columns left over are
    /// intersected in one at a time through their probing tables.
    fn build(&self, vertical: &Vertical) -> Partition {
        let cached: Vec<(Vertical, Arc<Partition>)> = {
            let state = self.state.lock();
            state
                .index
                .subset_entries(vertical)
                .into_iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        let mut uncovered = vertical.clone();
        let base = cached.iter().max_by(|(ka, pa), (kb, pb)| {
            ka.arity()
                .cmp(&kb.arity())
                .then(pb.size().cmp(&pa.size()))
                .then(kb.cmp(ka))
        });
        let mut result = match base {
            Some((k, p)) => {
                uncovered = uncovered.without(k);
                (**p).clone()
            }
            None => match uncovered.first() {
                Some(column) => {
                    uncovered = uncovered.without_column(column);
                    (**self.relation.column(column).partition()).clone()
                }
                None => return (*self.whole).clone(),
            },
        };

        while !uncovered.is_empty() && !result.is_unique() {
            let best = cached
                .iter()
                .map(|(k, p)| (k.intersection(&uncovered).arity(), k, p))
                .filter(|(gain, _, _)| *gain > 0)
                .max_by(|(ga, ka, pa), (gb, kb, pb)| {
                    ga.cmp(gb)
                        .then(pb.size().cmp(&pa.size()))
                        .then(kb.cmp(ka))
                });
            match best {
                Some((_, k, p)) => {
                    result = result.intersect(p);
                    uncovered = uncovered.without(k);
                    self.intersections.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        for column in uncovered.iter() {
            if result.is_unique() {
                break;
            }
            result = result.intersect_probe(self.relation.column(column).probing_table());
            self.intersections.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// The number of cached multi-column partitions.
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Returns `true` if no multi-column partition is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot of the cache's counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            intersections: self.intersections.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn relation() -> ColumnLayoutRelation {
        let rows = vec![
            vec![Some("1"), Some("a"), Some("x"), Some("p")],
            vec![Some("1"), Some("a"), Some("y"), Some("p")],
            vec![Some("1"), Some("b"), Some("x"), Some("p")],
            vec![Some("2"), Some("b"), Some("x"), Some("q")],
            vec![Some("2"), Some("b"), Some("x"), Some("q")],
            vec![Some("2"), Some("a"), Some("y"), Some("q")],
        ];
        ColumnLayoutRelation::from_rows("t", vec!["a", "b", "c", "d"], rows, true).unwrap()
    }

    fn cache<'r>(
        relation: &'r ColumnLayoutRelation,
        method: CachingMethod,
        policy: Box<dyn EvictionPolicy>,
    ) -> PartitionCache<'r> {
        let random = Arc::new(Mutex::new(StdRng::seed_from_u64(0)));
        PartitionCache::new(relation, method, 0.5, 1.0, policy, random)
    }

    fn direct(relation: &ColumnLayoutRelation, vertical: &Vertical) -> Partition {
        vertical.iter().fold(Partition::whole(relation.num_rows()), |p, c| {
            p.intersect_probe(relation.column(c).probing_table())
        })
    }

    #[test]
    fn builds_match_direct_intersection() {
        let relation = relation();
        let cache = cache(&relation, CachingMethod::All, Box::new(NoEviction));
        for bits in 0u32..16 {
            let vertical: Vertical = (0..4).filter(|c| bits & (1 << c) != 0).collect();
            assert_eq!(*cache.get_or_build(&vertical), direct(&relation, &vertical));
        }
        assert!(cache.stats().misses > 0);
        let before = cache.stats().hits;
        cache.get_or_build(&Vertical::new(&[0, 1, 2]));
        assert_eq!(cache.stats().hits, before + 1);
    }

    #[test]
    fn concurrent_requests_share_one_build() {
        let relation = relation();
        let abcd = Vertical::new(&[0, 1, 2, 3]);
        let sequential = cache(&relation, CachingMethod::All, Box::new(NoEviction));
        sequential.get_or_build(&abcd);

        let cache = cache(&relation, CachingMethod::All, Box::new(NoEviction));
        let (shared, target) = (&cache, &abcd);
        let built: Vec<Arc<Partition>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(move || shared.get_or_build(target)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().intersections, sequential.stats().intersections);
        assert_eq!(*built[0], direct(&relation, &abcd));
        for partition in built.iter() {
            assert!(Arc::ptr_eq(partition, &built[0]));
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn nocaching_keeps_nothing() {
        let relation = relation();
        let cache = cache(&relation, CachingMethod::Nothing, Box::new(NoEviction));
        let ab = Vertical::new(&[0, 1]);
        let first = cache.get_or_build(&ab);
        assert!(cache.is_empty());
        assert!(cache.peek(&ab).is_none());
        assert_eq!(first, cache.get_or_build(&ab));
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn lru_respects_capacity() {
        let relation = relation();
        let cache = cache(
            &relation,
            CachingMethod::All,
            Box::new(LeastRecentlyUsed::new(2)),
        );
        let ab = Vertical::new(&[0, 1]);
        let bc = Vertical::new(&[1, 2]);
        let cd = Vertical::new(&[2, 3]);
        let held = cache.get_or_build(&ab);
        cache.get_or_build(&bc);
        cache.peek(&ab);
        cache.get_or_build(&cd);
        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&bc).is_none());
        assert!(cache.peek(&ab).is_some());
        // Evicted snapshots stay valid for whoever holds them.
        assert_eq!(*held, direct(&relation, &ab));
    }

    #[test]
    fn bounded_size_evicts_down_to_budget() {
        let relation = relation();
        let cache = cache(&relation, CachingMethod::All, Box::new(BoundedSize::new(5)));
        let ad = Vertical::new(&[0, 3]);
        let bc = Vertical::new(&[1, 2]);
        assert_eq!(cache.get_or_build(&ad).size(), 6);
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_build(&bc).size(), 5);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn selector_names() {
        assert_eq!("entropy".parse(), Ok(CachingMethod::Entropy));
        assert_eq!("size".parse(), Ok(EvictionMethod::Size));
        assert_eq!(
            "sometimes".parse::<CachingMethod>(),
            Err(ProfilingError::UnknownCachingMethod("sometimes".to_owned()))
        );
    }
}

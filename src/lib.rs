#![warn(missing_docs)]
#![doc(test(no_crate_inject))]
#![doc(test(attr(deny(unused, future_incompatible))))]

//! This crate discovers approximate functional dependencies and approximate unique column
//! combinations (keys) in a table, using the Pyro algorithm described in:
//!
//! - Kruse and Naumann, [Efficient Discovery of Approximate Dependencies][pyro], PVLDB 11(7),
//!   2018
//!
//! [pyro]: https://www.vldb.org/pvldb/vol11/p759-kruse.pdf
//!
//! Errors are measured with g1': the fraction of all row pairs that violate a dependency. A
//! key is violated by every pair of rows that agree on all of its columns; an FD `X → A` by
//! every pair that agrees on `X` but not on `A`. Given an error bound, the profiler reports
//! every *minimal* dependency within it.
//!
//! The search runs one [`SearchSpace`] per target, i.e. one for keys and one per FD
//! right-hand side. Each space walks the lattice of column sets ([`Vertical`]s) upwards from
//! small *launch pads*, guided by errors estimated from samples of agreeing row pairs
//! ([`AgreeSetSample`]), and once it hits a dependency, walks back down to the minimal
//! dependencies below it, verifying each step with exact partitions ([`Partition`]) from a
//! shared [`PartitionCache`].
//!
//! Most callers only need [`ColumnLayoutRelation`] to load data and [`Profiler`] to run:
//!
//! ```
//! use pyro_profiler::{ColumnLayoutRelation, Configuration, Profiler};
//!
//! let rows = vec![
//!     vec![Some("1"), Some("Ann"), Some("Berlin")],
//!     vec![Some("2"), Some("Bob"), Some("Berlin")],
//!     vec![Some("3"), Some("Ann"), Some("Paris")],
//!     vec![Some("4"), Some("Cid"), Some("Paris")],
//! ];
//! let relation = ColumnLayoutRelation::from_rows(
//!     "people", vec!["id", "name", "city"], rows, true).unwrap();
//!
//! let mut config = Configuration::default();
//! config.max_ucc_error = 0.0;
//! config.max_fd_error = 0.0;
//! let result = Profiler::new(config).execute(&relation).unwrap();
//!
//! let mut keys: Vec<_> = result.keys.iter().map(|k| k.describe(relation.schema())).collect();
//! keys.sort();
//! assert_eq!(keys, vec![
//!     "key [id] (error 0.000000)",
//!     "key [name, city] (error 0.000000)",
//! ]);
//! ```

pub use sorted_iter;

mod cache;
mod candidate;
mod config;
mod context;
mod error;
mod partition;
mod profiler;
mod relation;
mod sample;
mod search;
mod strategy;
mod vertical;

pub use cache::{
    BoundedSize, CacheStats, CachingMethod, EvictionMethod, EvictionPolicy, LeastRecentlyUsed,
    NoEviction, PartitionCache,
};
pub use candidate::{DependencyCandidate, LaunchPadOrder};
pub use config::{Configuration, ErrorMeasure, Settings};
pub use context::{EntropyStatistics, ProfilingContext};
pub use error::{ProfilingError, Result};
pub use partition::{Partition, PartitionSummary, MAX_ROWS};
pub use profiler::{fletcher16, Diagnostics, Profiler, ProfilingResult};
pub use relation::{ColumnData, ColumnLayoutRelation};
pub use sample::{z_score, AgreeSetSample, ConfidenceInterval};
pub use search::{minimal_hitting_sets, NodeState, SearchSpace, SearchStats};
pub use strategy::{
    violating_pairs, DependencyStrategy, FdStrategy, KeyStrategy, PartialFd, PartialKey, Target,
};
pub use vertical::{Column, Columns, RelationalSchema, Vertical, VerticalMap};

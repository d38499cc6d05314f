//! Error types for profiling runs.

use thiserror::Error;

/// Result type for profiling operations.
pub type Result<T> = std::result::Result<T, ProfilingError>;

/// Errors that abort a profiling run.
///
/// All of these are raised before any search starts: configuration problems while validating
/// a [`Configuration`](crate::Configuration), and input problems while building a
/// [`ColumnLayoutRelation`](crate::ColumnLayoutRelation) or starting the
/// [`Profiler`](crate::Profiler). Inconclusive estimates and cache misses are never errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfilingError {
    /// An error measure name that no strategy implements.
    #[error("unknown {target} error measure {name:?}")]
    UnknownErrorMeasure {
        /// Which dependency kind the measure was configured for, "key" or "fd".
        target: &'static str,
        /// The rejected name.
        name: String,
    },

    /// A launch pad ordering name that is neither "arity" nor "error".
    #[error("unknown launch pad order {0:?}")]
    UnknownLaunchPadOrder(String),

    /// A partition caching method name that isn't recognized.
    #[error("unknown caching method {0:?}")]
    UnknownCachingMethod(String),

    /// A cache eviction method name that isn't recognized.
    #[error("unknown cache eviction method {0:?}")]
    UnknownEvictionMethod(String),

    /// A numeric parameter outside its allowed range.
    #[error("invalid value {value} for {name}: {reason}")]
    InvalidParameter {
        /// The configuration field.
        name: &'static str,
        /// The rejected value.
        value: f64,
        /// What the value must satisfy.
        reason: &'static str,
    },

    /// The input relation has no columns, so there is nothing to profile.
    #[error("the input relation has no columns; dependency discovery is meaningless")]
    EmptyRelation,

    /// A row whose length doesn't match the header.
    #[error("row {row} has {found} fields, expected {expected}")]
    RaggedRow {
        /// Zero-based row position.
        row: usize,
        /// The length of the header.
        expected: usize,
        /// The length actually found.
        found: usize,
    },

    /// A different number of column partitions than the schema has columns.
    #[error("the schema has {expected} columns but {found} partitions were given")]
    PartitionCount {
        /// The number of schema columns.
        expected: usize,
        /// The number of partitions.
        found: usize,
    },

    /// A column partition whose row count doesn't match the first column's.
    #[error("column {column} covers {found} rows, expected {expected}")]
    ColumnMismatch {
        /// Zero-based column position.
        column: usize,
        /// The row count of the first column.
        expected: usize,
        /// The row count actually found.
        found: usize,
    },

    /// More rows than a partition can address.
    #[error("the input relation has more than {limit} rows")]
    TooManyRows {
        /// The largest supported row count.
        limit: usize,
    },

    /// A relation partitioned under one null policy, profiled under the other.
    #[error(
        "the relation was built with null_equals_null = {relation}, \
         but the configuration says {configured}"
    )]
    NullPolicyMismatch {
        /// The policy the relation's partitions were built with.
        relation: bool,
        /// The configured policy.
        configured: bool,
    },
}

impl ProfilingError {
    pub(crate) fn invalid(name: &'static str, value: f64, reason: &'static str) -> Self {
        ProfilingError::InvalidParameter {
            name,
            value,
            reason,
        }
    }
}

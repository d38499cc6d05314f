//! Stripped partitions, also known as position list indices (PLIs).

use std::collections::HashMap;
use std::iter;

/// Row positions are stored as `u32`, which caps how many rows a partition can cover.
pub const MAX_ROWS: usize = u32::MAX as usize;

fn row_id(row: usize) -> u32 {
    match u32::try_from(row) {
        Ok(id) if row < MAX_ROWS => id,
        _ => panic!("row {} is past the {} row limit", row, MAX_ROWS),
    }
}

/// Summary statistics for a single [`Partition`].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct PartitionSummary {
    /// The [Shannon entropy][] of the partition's class sizes, measured in bits. A partition
    /// where every row is alone in its class has entropy `log2(rows)`; one where all rows share
    /// a class has entropy 0.
    ///
    /// [Shannon entropy]: https://en.wikipedia.org/wiki/Entropy_(information_theory)
    pub entropy: f64,

    /// The Gini impurity of the class sizes, `1 - Σ (c/n)²`.
    pub gini: f64,

    /// The number of rows the partition covers.
    pub num_rows: usize,
}

impl PartitionSummary {
    /// Summarizes a partition of `num_rows` rows whose non-singleton classes have the given
    /// sizes. Every row not accounted for is taken to be alone in its class.
    ///
    /// ```
    /// use pyro_profiler::PartitionSummary;
    ///
    /// let constant = PartitionSummary::from_class_sizes(4, vec![4]);
    /// assert_eq!(constant.entropy, 0.0);
    /// assert_eq!(constant.gini, 0.0);
    ///
    /// let unique = PartitionSummary::from_class_sizes(4, vec![]);
    /// assert_eq!(unique.entropy, 2.0);
    /// assert_eq!(unique.gini, 0.75);
    ///
    /// let halves = PartitionSummary::from_class_sizes(4, vec![2, 2]);
    /// assert_eq!(halves.entropy, 1.0);
    /// ```
    pub fn from_class_sizes(num_rows: usize, sizes: impl IntoIterator<Item = usize>) -> Self {
        let mut summary = PartitionSummary {
            entropy: 0.0,
            gini: 0.0,
            num_rows,
        };
        if num_rows <= 1 {
            return summary;
        }

        let n = num_rows as f64;
        let mut covered = 0;
        let mut squares = 0.0;
        for size in sizes {
            let c = size as f64;
            covered += size;
            summary.entropy -= c * c.log2();
            squares += c * c;
        }
        // Singletons add nothing to the entropy sum, but one each to the sum of squares.
        squares += num_rows.saturating_sub(covered) as f64;

        summary.entropy /= n;
        summary.entropy += n.log2();
        summary.gini = 1.0 - squares / (n * n);
        summary
    }
}

/// The rows of a relation grouped into classes that share the same values on some set of
/// columns.
///
/// Classes with a single row carry no information about agreeing row pairs, so they are
/// stripped; only the total number of rows is kept. Each class lists its rows in ascending
/// order and classes are ordered by their first row, so equal partitions compare equal no
/// matter how they were computed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Partition {
    classes: Vec<Vec<u32>>,
    num_rows: usize,
    nep: u64,
}

fn pairs(size: usize) -> u64 {
    let size = size as u64;
    size * size.saturating_sub(1) / 2
}

impl Partition {
    fn from_classes(num_rows: usize, mut classes: Vec<Vec<u32>>) -> Self {
        classes.retain(|class| class.len() > 1);
        classes.sort_unstable_by_key(|class| class[0]);
        classes.shrink_to_fit();
        let nep = classes.iter().map(|class| pairs(class.len())).sum();
        Partition {
            classes,
            num_rows,
            nep,
        }
    }

    /// Builds the partition of a single column from the value id of each row. Rows whose id is
    /// `None` never agree with any other row.
    ///
    /// # Panics
    ///
    /// Panics if there are more than [`MAX_ROWS`] values.
    ///
    /// ```
    /// use pyro_profiler::Partition;
    ///
    /// let p = Partition::from_values(vec![Some(7), Some(8), Some(7), None, None, Some(9)]);
    /// assert_eq!(p.num_rows(), 6);
    /// assert_eq!(p.classes(), &[vec![0, 2]]);
    /// assert_eq!(p.nep(), 1);
    /// ```
    pub fn from_values<K, I>(values: I) -> Self
    where
        K: std::hash::Hash + Eq,
        I: IntoIterator<Item = Option<K>>,
    {
        let mut index: HashMap<K, Vec<u32>> = HashMap::new();
        let mut num_rows = 0;
        for (row, value) in values.into_iter().enumerate() {
            num_rows += 1;
            if let Some(value) = value {
                index.entry(value).or_insert_with(Vec::new).push(row_id(row));
            }
        }
        Partition::from_classes(num_rows, index.into_iter().map(|(_, rows)| rows).collect())
    }

    /// The partition of the empty set of columns: every row agrees with every other row.
    ///
    /// # Panics
    ///
    /// Panics if `num_rows` is more than [`MAX_ROWS`].
    pub fn whole(num_rows: usize) -> Self {
        Partition::from_classes(num_rows, vec![(0..num_rows).map(row_id).collect()])
    }

    /// The non-singleton classes, each a sorted list of row positions.
    pub fn classes(&self) -> &[Vec<u32>] {
        &self.classes
    }

    /// The number of rows in the relation this partition was built over.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// The number of non-singleton classes.
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// The number of rows in non-singleton classes.
    pub fn size(&self) -> usize {
        self.classes.iter().map(Vec::len).sum()
    }

    /// The number of unordered row pairs that agree, i.e. share a class.
    pub fn nep(&self) -> u64 {
        self.nep
    }

    /// Returns `true` if no two rows agree.
    pub fn is_unique(&self) -> bool {
        self.classes.is_empty()
    }

    /// Computes the [`PartitionSummary`] of this partition.
    pub fn summary(&self) -> PartitionSummary {
        PartitionSummary::from_class_sizes(self.num_rows, self.classes.iter().map(Vec::len))
    }

    /// The entropy of this partition in bits. See [`PartitionSummary::entropy`].
    pub fn entropy(&self) -> f64 {
        self.summary().entropy
    }

    /// The Gini impurity of this partition. See [`PartitionSummary::gini`].
    pub fn gini(&self) -> f64 {
        self.summary().gini
    }

    /// Maps every row to a 1-based class id, or to 0 if the row is alone in its class.
    pub fn probing_table(&self) -> Vec<u32> {
        let mut probe = vec![0; self.num_rows];
        for (id, class) in self.classes.iter().enumerate() {
            for &row in class.iter() {
                probe[row as usize] = id as u32 + 1;
            }
        }
        probe
    }

    /// Refines this partition by another one over the same rows, giving the partition of the
    /// union of both column sets.
    ///
    /// ```
    /// use pyro_profiler::Partition;
    ///
    /// let a = Partition::from_values(vec![Some(1), Some(1), Some(1), Some(2), Some(2)]);
    /// let b = Partition::from_values(vec![Some("x"), Some("x"), Some("y"), Some("y"), Some("y")]);
    /// let ab = a.intersect(&b);
    /// assert_eq!(ab.classes(), &[vec![0, 1], vec![3, 4]]);
    /// assert_eq!(ab, b.intersect(&a));
    /// ```
    pub fn intersect(&self, other: &Partition) -> Partition {
        self.intersect_probe(&other.probing_table())
    }

    /// Refines this partition by a probing table, as produced by [`Partition::probing_table`].
    ///
    /// Each class is split by the probed class id of its rows. Rows probing to 0 are singletons
    /// in the other partition and so are singletons in the result too.
    pub fn intersect_probe(&self, probe: &[u32]) -> Partition {
        debug_assert_eq!(probe.len(), self.num_rows);
        let mut classes = Vec::new();

        // Reuse the same map for every class to avoid hammering the allocator.
        let mut groups: HashMap<u32, Vec<u32>> = HashMap::new();
        for class in self.classes.iter() {
            for &row in class.iter() {
                let id = probe[row as usize];
                if id != 0 {
                    groups.entry(id).or_insert_with(Vec::new).push(row);
                }
            }
            classes.extend(groups.drain().map(|(_, rows)| rows));
        }
        Partition::from_classes(self.num_rows, classes)
    }

    /// Iterates over every agreeing row pair, in class order.
    pub fn agreeing_pairs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.classes.iter().flat_map(|class| {
            let mut first = 0;
            let mut second = 0;
            iter::from_fn(move || {
                second += 1;
                if second >= class.len() {
                    first += 1;
                    second = first + 1;
                }
                if second < class.len() {
                    Some((class[first], class[second]))
                } else {
                    None
                }
            })
        })
    }
}

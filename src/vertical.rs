//! Columns, schemas, and the attribute sets ("verticals") that the lattice search walks over.

use smallvec::SmallVec;
use sorted_iter::sorted_iterator::SortedByItem;
use std::collections::BTreeMap;
use std::fmt;
use std::iter;
use std::ops::ControlFlow;

const WORD_BITS: usize = u64::BITS as usize;

/// A named column and its stable position in a [`RelationalSchema`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Column {
    name: String,
    index: usize,
}

impl Column {
    /// Creates a column with the given name at position `index`.
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Column {
            name: name.into(),
            index,
        }
    }

    /// The column's name, as given in the input header.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The column's position in its schema.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// An ordered, immutable list of columns.
#[derive(Clone, Debug)]
pub struct RelationalSchema {
    name: String,
    columns: Vec<Column>,
}

impl RelationalSchema {
    /// Creates a schema whose columns get consecutive indices in the order given.
    ///
    /// ```
    /// use pyro_profiler::RelationalSchema;
    ///
    /// let schema = RelationalSchema::new("people", vec!["id", "name", "city"]);
    /// assert_eq!(schema.num_columns(), 3);
    /// assert_eq!(schema.column(2).map(|c| c.name()), Some("city"));
    /// assert_eq!(schema.format(&schema.vertical(&[0, 2])), "[id, city]");
    /// ```
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        RelationalSchema {
            name: name.into(),
            columns: columns
                .into_iter()
                .enumerate()
                .map(|(index, name)| Column::new(name, index))
                .collect(),
        }
    }

    /// The relation's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All columns, in schema order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The number of columns in the schema.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Looks up a column by position.
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// The vertical containing no columns.
    pub fn empty_vertical(&self) -> Vertical {
        Vertical::empty()
    }

    /// The vertical containing every column of this schema.
    pub fn full_vertical(&self) -> Vertical {
        (0..self.columns.len()).collect()
    }

    /// The vertical containing the columns at the given positions.
    pub fn vertical(&self, indices: &[usize]) -> Vertical {
        debug_assert!(indices.iter().all(|&i| i < self.columns.len()));
        Vertical::new(indices)
    }

    /// Renders a vertical using this schema's column names.
    pub fn format(&self, vertical: &Vertical) -> String {
        let mut out = String::from("[");
        for (n, index) in vertical.iter().enumerate() {
            if n > 0 {
                out.push_str(", ");
            }
            match self.columns.get(index) {
                Some(column) => out.push_str(&column.name),
                None => out.push_str(&format!("#{}", index)),
            }
        }
        out.push(']');
        out
    }
}

/// A set of columns, stored as a bitset.
///
/// Trailing zero words are never stored, so two verticals holding the same columns are
/// identical regardless of how they were computed. That makes the derived `Eq` and `Hash`
/// structural, and verticals work as map keys across independently built components.
/// The derived `Ord` is an arbitrary but deterministic total order.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Vertical(SmallVec<[u64; 2]>);

impl Vertical {
    fn from_words(mut words: SmallVec<[u64; 2]>) -> Self {
        while words.last() == Some(&0) {
            words.pop();
        }
        Vertical(words)
    }

    /// The empty vertical.
    pub fn empty() -> Self {
        Vertical(SmallVec::new())
    }

    /// A vertical with exactly one column.
    pub fn single(column: usize) -> Self {
        Vertical::empty().with_column(column)
    }

    /// Creates a vertical containing the specified columns.
    ///
    /// It's okay if the provided slice contains duplicates.
    ///
    /// ```
    /// use pyro_profiler::Vertical;
    ///
    /// let v = Vertical::new(&[70, 3, 3]);
    /// assert_eq!(v.arity(), 2);
    /// assert!(v.contains(70));
    /// assert_eq!(v.iter().collect::<Vec<_>>(), vec![3, 70]);
    /// ```
    pub fn new(columns: &[usize]) -> Self {
        columns.iter().copied().collect()
    }

    /// The number of columns in the set.
    pub fn arity(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns `true` if this vertical has no columns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if `column` is a member of this set.
    pub fn contains(&self, column: usize) -> bool {
        self.0
            .get(column / WORD_BITS)
            .map_or(false, |w| w & (1 << (column % WORD_BITS)) != 0)
    }

    fn word(&self, index: usize) -> u64 {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// Returns `true` if `other` contains every column that `self` does.
    ///
    /// ```
    /// use pyro_profiler::Vertical;
    /// let nil = Vertical::empty();
    /// let one = Vertical::single(1);
    ///
    /// assert!(nil.is_subset(&one));
    /// assert!(nil.is_subset(&nil));
    /// assert!(one.is_subset(&one));
    /// assert!(!one.is_subset(&nil));
    /// ```
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0
            .iter()
            .enumerate()
            .all(|(i, w)| w & !other.word(i) == 0)
    }

    /// Returns `true` if `self` contains every column that `other` does.
    pub fn is_superset(&self, other: &Self) -> bool {
        other.is_subset(self)
    }

    /// Returns `true` if the two verticals share at least one column.
    pub fn intersects(&self, other: &Self) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// The columns in either vertical.
    pub fn union(&self, other: &Self) -> Self {
        let len = self.0.len().max(other.0.len());
        Vertical::from_words((0..len).map(|i| self.word(i) | other.word(i)).collect())
    }

    /// The columns in both verticals.
    pub fn intersection(&self, other: &Self) -> Self {
        Vertical::from_words(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(a, b)| a & b)
                .collect(),
        )
    }

    /// The columns in `self` but not in `other`.
    pub fn without(&self, other: &Self) -> Self {
        Vertical::from_words(
            self.0
                .iter()
                .enumerate()
                .map(|(i, w)| w & !other.word(i))
                .collect(),
        )
    }

    /// The columns of `scope` that are not in `self`.
    pub fn complement_within(&self, scope: &Self) -> Self {
        scope.without(self)
    }

    /// A copy of this vertical with `column` added.
    pub fn with_column(&self, column: usize) -> Self {
        let mut words = self.0.clone();
        let index = column / WORD_BITS;
        if words.len() <= index {
            words.resize(index + 1, 0);
        }
        words[index] |= 1 << (column % WORD_BITS);
        Vertical(words)
    }

    /// A copy of this vertical with `column` removed.
    pub fn without_column(&self, column: usize) -> Self {
        let mut words = self.0.clone();
        if let Some(word) = words.get_mut(column / WORD_BITS) {
            *word &= !(1 << (column % WORD_BITS));
        }
        Vertical::from_words(words)
    }

    /// Returns an iterator over the columns which appear in this set, in ascending order.
    ///
    /// ```
    /// use pyro_profiler::Vertical;
    ///
    /// let abc = Vertical::new(&[2, 130, 1]);
    /// let mut it = abc.iter();
    /// assert_eq!(it.next(), Some(1));
    /// assert_eq!(it.next(), Some(2));
    /// assert_eq!(it.next(), Some(130));
    /// assert_eq!(it.next(), None);
    /// ```
    pub fn iter(&self) -> Columns<'_> {
        Columns {
            words: &self.0,
            index: 0,
            current: self.0.first().copied().unwrap_or(0),
        }
    }

    /// The lowest column in the set, if any.
    pub fn first(&self) -> Option<usize> {
        self.iter().next()
    }

    /// Returns an iterator over every subset of this vertical that has one column less, one
    /// step down the lattice.
    ///
    /// ```
    /// use pyro_profiler::Vertical;
    ///
    /// let abc = Vertical::new(&[0, 1, 2]);
    /// let parents: Vec<_> = abc.parents().collect();
    /// assert_eq!(
    ///     parents,
    ///     vec![Vertical::new(&[1, 2]), Vertical::new(&[0, 2]), Vertical::new(&[0, 1])]
    /// );
    /// ```
    pub fn parents(&self) -> impl Iterator<Item = Self> + '_ {
        self.iter().map(move |column| self.without_column(column))
    }

    /// Returns an iterator over every superset of this vertical that has one more column taken
    /// from `scope`, one step up the lattice.
    ///
    /// ```
    /// use pyro_profiler::Vertical;
    ///
    /// let scope = Vertical::new(&[0, 1, 2]);
    /// let b = Vertical::single(1);
    /// let children: Vec<_> = b.children_within(&scope).collect();
    /// assert_eq!(children, vec![Vertical::new(&[0, 1]), Vertical::new(&[1, 2])]);
    /// ```
    pub fn children_within<'a>(&'a self, scope: &'a Self) -> impl Iterator<Item = Self> + 'a {
        use sorted_iter::SortedIterator;
        scope
            .iter()
            .difference(self.iter())
            .map(move |column| self.with_column(column))
    }
}

impl fmt::Debug for Vertical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl iter::FromIterator<usize> for Vertical {
    /// Creates a vertical containing the specified columns.
    ///
    /// It's okay if the provided iterator contains duplicates.
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut words: SmallVec<[u64; 2]> = SmallVec::new();
        for column in iter {
            let index = column / WORD_BITS;
            if words.len() <= index {
                words.resize(index + 1, 0);
            }
            words[index] |= 1 << (column % WORD_BITS);
        }
        Vertical::from_words(words)
    }
}

/// Iterator over the columns of a [`Vertical`], produced in ascending order.
#[derive(Clone, Debug)]
pub struct Columns<'a> {
    words: &'a [u64],
    index: usize,
    current: u64,
}

impl Iterator for Columns<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.current == 0 {
            self.index += 1;
            self.current = *self.words.get(self.index)?;
        }
        let bit = self.current.trailing_zeros() as usize;
        self.current &= self.current - 1;
        Some(self.index * WORD_BITS + bit)
    }
}

impl SortedByItem for Columns<'_> {}

/// A map keyed by verticals that answers "which keys are subsets (or supersets) of this
/// vertical?" without scanning every entry.
///
/// Internally this is a set-trie: each key is a path of ascending column indices, so a
/// subset query only follows edges for columns in the query, and a superset query can skip
/// any edge past the next column it still has to match.
///
/// ```
/// use pyro_profiler::{Vertical, VerticalMap};
///
/// let mut map = VerticalMap::new();
/// map.insert(Vertical::new(&[0, 1]), "ab");
/// map.insert(Vertical::new(&[1, 2]), "bc");
/// map.insert(Vertical::new(&[2]), "c");
///
/// let abc = Vertical::new(&[0, 1, 2]);
/// assert_eq!(map.subset_entries(&abc).len(), 3);
/// assert!(map.any_superset_of(&Vertical::single(0)));
/// assert!(!map.any_subset_of(&Vertical::single(0)));
///
/// let mut supersets: Vec<_> = map
///     .superset_entries(&Vertical::single(2))
///     .into_iter()
///     .map(|(_, v)| *v)
///     .collect();
/// supersets.sort_unstable();
/// assert_eq!(supersets, vec!["bc", "c"]);
/// ```
#[derive(Clone, Debug)]
pub struct VerticalMap<V> {
    root: Node<V>,
    len: usize,
}

#[derive(Clone, Debug)]
struct Node<V> {
    entry: Option<(Vertical, V)>,
    children: BTreeMap<usize, Node<V>>,
}

impl<V> Node<V> {
    fn new() -> Self {
        Node {
            entry: None,
            children: BTreeMap::new(),
        }
    }

    fn is_vacant(&self) -> bool {
        self.entry.is_none() && self.children.is_empty()
    }
}

impl<V> Default for VerticalMap<V> {
    fn default() -> Self {
        VerticalMap::new()
    }
}

impl<V> VerticalMap<V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        VerticalMap {
            root: Node::new(),
            len: 0,
        }
    }

    /// The number of entries in the map.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, key: &Vertical) -> Option<&Node<V>> {
        let mut node = &self.root;
        for column in key.iter() {
            node = node.children.get(&column)?;
        }
        Some(node)
    }

    /// Inserts a value, returning the value previously stored under an equal key.
    pub fn insert(&mut self, key: Vertical, value: V) -> Option<V> {
        let mut node = &mut self.root;
        for column in key.iter() {
            node = node.children.entry(column).or_insert_with(Node::new);
        }
        let old = node.entry.replace((key, value)).map(|(_, v)| v);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    /// Looks up the value stored under exactly this key.
    pub fn get(&self, key: &Vertical) -> Option<&V> {
        self.node(key)?.entry.as_ref().map(|(_, v)| v)
    }

    /// Returns `true` if there is an entry under exactly this key.
    pub fn contains_key(&self, key: &Vertical) -> bool {
        self.get(key).is_some()
    }

    /// Removes the entry under exactly this key, pruning trie nodes left without entries.
    pub fn remove(&mut self, key: &Vertical) -> Option<V> {
        let path: Vec<usize> = key.iter().collect();
        let mut node = &mut self.root;
        for column in path.iter() {
            node = node.children.get_mut(column)?;
        }
        let (_, value) = node.entry.take()?;
        self.len -= 1;

        // Walk back up from the deepest node, dropping each one that no longer holds anything.
        for depth in (1..=path.len()).rev() {
            let mut parent = &mut self.root;
            for column in path[..depth - 1].iter() {
                match parent.children.get_mut(column) {
                    Some(next) => parent = next,
                    None => return Some(value),
                }
            }
            let last = path[depth - 1];
            if parent.children.get(&last).map_or(false, Node::is_vacant) {
                parent.children.remove(&last);
            } else {
                break;
            }
        }
        Some(value)
    }

    fn visit_subsets<'a, F>(&'a self, query: &Vertical, mut visit: F) -> ControlFlow<()>
    where
        F: FnMut(&'a Vertical, &'a V) -> ControlFlow<()>,
    {
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            if let Some((key, value)) = &node.entry {
                visit(key, value)?;
            }
            stack.extend(
                node.children
                    .iter()
                    .filter(|(column, _)| query.contains(**column))
                    .map(|(_, child)| child),
            );
        }
        ControlFlow::Continue(())
    }

    fn visit_supersets<'a, F>(&'a self, query: &Vertical, mut visit: F) -> ControlFlow<()>
    where
        F: FnMut(&'a Vertical, &'a V) -> ControlFlow<()>,
    {
        let wanted: Vec<usize> = query.iter().collect();
        let mut stack = vec![(&self.root, 0)];
        while let Some((node, matched)) = stack.pop() {
            match wanted.get(matched) {
                None => {
                    if let Some((key, value)) = &node.entry {
                        visit(key, value)?;
                    }
                    stack.extend(node.children.values().map(|child| (child, matched)));
                }
                Some(&next) => {
                    // Edges below `next` may still lead to it; the edge for `next` itself
                    // consumes it; anything past `next` can never contain it.
                    for (&column, child) in node.children.range(..=next) {
                        let matched = if column == next { matched + 1 } else { matched };
                        stack.push((child, matched));
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// All entries whose key is a subset of `query` (including `query` itself).
    pub fn subset_entries(&self, query: &Vertical) -> Vec<(&Vertical, &V)> {
        let mut found = Vec::new();
        let _ = self.visit_subsets(query, |k, v| {
            found.push((k, v));
            ControlFlow::Continue(())
        });
        found
    }

    /// All entries whose key is a superset of `query` (including `query` itself).
    pub fn superset_entries(&self, query: &Vertical) -> Vec<(&Vertical, &V)> {
        let mut found = Vec::new();
        let _ = self.visit_supersets(query, |k, v| {
            found.push((k, v));
            ControlFlow::Continue(())
        });
        found
    }

    /// Returns `true` if some key is a subset of `query`.
    pub fn any_subset_of(&self, query: &Vertical) -> bool {
        self.visit_subsets(query, |_, _| ControlFlow::Break(()))
            .is_break()
    }

    /// Returns `true` if some key is a superset of `query`.
    pub fn any_superset_of(&self, query: &Vertical) -> bool {
        self.visit_supersets(query, |_, _| ControlFlow::Break(()))
            .is_break()
    }

    /// Removes every entry whose key is a subset of `query`, returning how many were removed.
    pub fn remove_subsets_of(&mut self, query: &Vertical) -> usize {
        let keys: Vec<Vertical> = self
            .subset_entries(query)
            .into_iter()
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys.iter() {
            self.remove(key);
        }
        keys.len()
    }

    /// Every entry in the map, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&Vertical, &V)> {
        let mut stack = vec![&self.root];
        iter::from_fn(move || loop {
            let node = stack.pop()?;
            stack.extend(node.children.values());
            if let Some((key, value)) = &node.entry {
                return Some((key, value));
            }
        })
    }

    /// Every key in the map, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &Vertical> {
        self.iter().map(|(k, _)| k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_verticals(columns: usize) -> Vec<Vertical> {
        (0u32..1 << columns)
            .map(|bits| (0..columns).filter(|c| bits & (1 << c) != 0).collect())
            .collect()
    }

    #[test]
    fn trie_queries_match_brute_force() {
        let universe = all_verticals(5);
        let mut map = VerticalMap::new();
        for (n, v) in universe.iter().enumerate() {
            if n % 3 == 1 {
                map.insert(v.clone(), n);
            }
        }

        for query in universe.iter() {
            let mut expected: Vec<_> =
                map.keys().filter(|k| k.is_subset(query)).cloned().collect();
            let mut got: Vec<_> = map
                .subset_entries(query)
                .into_iter()
                .map(|(k, _)| k.clone())
                .collect();
            expected.sort();
            got.sort();
            assert_eq!(got, expected, "subsets of {:?}", query);
            assert_eq!(map.any_subset_of(query), !expected.is_empty());

            let mut expected: Vec<_> =
                map.keys().filter(|k| k.is_superset(query)).cloned().collect();
            let mut got: Vec<_> = map
                .superset_entries(query)
                .into_iter()
                .map(|(k, _)| k.clone())
                .collect();
            expected.sort();
            got.sort();
            assert_eq!(got, expected, "supersets of {:?}", query);
            assert_eq!(map.any_superset_of(query), !expected.is_empty());
        }
    }

    #[test]
    fn remove_prunes_and_keeps_others() {
        let mut map = VerticalMap::new();
        map.insert(Vertical::new(&[0, 1, 2]), 1);
        map.insert(Vertical::new(&[0, 1]), 2);
        map.insert(Vertical::new(&[3]), 3);
        assert_eq!(map.len(), 3);

        assert_eq!(map.remove(&Vertical::new(&[0, 1, 2])), Some(1));
        assert_eq!(map.remove(&Vertical::new(&[0, 1, 2])), None);
        assert_eq!(map.get(&Vertical::new(&[0, 1])), Some(&2));
        assert_eq!(map.len(), 2);

        assert_eq!(map.remove_subsets_of(&Vertical::new(&[0, 1, 3])), 2);
        assert!(map.is_empty());
        assert!(map.root.is_vacant());
    }

    #[test]
    fn wide_verticals_normalize() {
        let wide = Vertical::new(&[1, 100]);
        assert_eq!(wide.without_column(100), Vertical::single(1));
        assert_eq!(wide.intersection(&Vertical::single(1)), Vertical::single(1));
        assert_eq!(wide.without(&wide), Vertical::empty());
        assert!(Vertical::single(100).intersects(&wide));
        assert!(!Vertical::single(99).intersects(&wide));
    }
}

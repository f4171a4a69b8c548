//! Property-to-index bookkeeping over a flat coordinate space
//!
//! An [`IndexOperations`] store maps properties (transforms, the fixed
//! marker, priors) to sets of flat offsets. The root of a parameter tree owns
//! the real stores; every other node reaches them through an
//! [`IndexOperationsView`], which translates the node's local offsets into the
//! root's coordinate space and clamps results to the node's window.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A property that can be recorded in an [`IndexOperations`] store.
///
/// Two properties with equal labels are the same property.
pub trait IndexProperty: Clone + fmt::Debug {
    /// Identity of the property
    fn label(&self) -> String;

    /// Whether an offset may carry at most one exclusive property at a time.
    ///
    /// Adding an exclusive property strips the offsets from every other
    /// exclusive property first.
    fn is_exclusive(&self) -> bool {
        false
    }
}

/// A mapping from property to the set of offsets it applies to.
///
/// Properties are kept in the order they were first added.
#[derive(Debug, Clone)]
pub struct IndexOperations<P> {
    entries: Vec<(P, BTreeSet<usize>)>,
}

impl<P> Default for IndexOperations<P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<P: IndexProperty> IndexOperations<P> {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, property: &P) -> Option<usize> {
        let label = property.label();
        self.entries.iter().position(|(p, _)| p.label() == label)
    }

    /// Record `property` for `indices`.
    ///
    /// If `property` is exclusive, the indices are first removed from every
    /// other exclusive property. Returns the indices that were taken away from
    /// another property that way (empty when nothing was overridden).
    ///
    /// # Examples
    ///
    /// ```
    /// use paramtree_rs::parameters::index_operations::IndexOperations;
    /// use paramtree_rs::parameters::Constraint;
    ///
    /// let mut store = IndexOperations::new();
    /// store.add(Constraint::Fixed, [0, 2]);
    /// assert_eq!(store.indices(&Constraint::Fixed), vec![0, 2]);
    /// assert_eq!(store.size(), 2);
    /// ```
    pub fn add<I>(&mut self, property: P, indices: I) -> Vec<usize>
    where
        I: IntoIterator<Item = usize>,
    {
        let indices: BTreeSet<usize> = indices.into_iter().collect();
        let label = property.label();
        let mut overridden = BTreeSet::new();

        if property.is_exclusive() {
            for (other, set) in self.entries.iter_mut() {
                if other.is_exclusive() && other.label() != label {
                    for index in &indices {
                        if set.remove(index) {
                            overridden.insert(*index);
                        }
                    }
                }
            }
            self.entries.retain(|(_, set)| !set.is_empty());
        }

        match self.position(&property) {
            Some(pos) => self.entries[pos].1.extend(indices),
            None if !indices.is_empty() => self.entries.push((property, indices)),
            None => {}
        }

        overridden.into_iter().collect()
    }

    /// Remove `indices` from `property`, returning the ones that were present.
    pub fn remove(&mut self, property: &P, indices: &[usize]) -> Vec<usize> {
        let Some(pos) = self.position(property) else {
            return Vec::new();
        };
        let set = &mut self.entries[pos].1;
        let removed: BTreeSet<usize> = indices.iter().copied().filter(|i| set.remove(i)).collect();
        if set.is_empty() {
            self.entries.remove(pos);
        }
        removed.into_iter().collect()
    }

    /// Remove `property` entirely, returning all of its indices.
    pub fn remove_property(&mut self, property: &P) -> Vec<usize> {
        match self.position(property) {
            Some(pos) => self.entries.remove(pos).1.into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// The sorted indices recorded for `property`
    pub fn indices(&self, property: &P) -> Vec<usize> {
        self.position(property)
            .map(|pos| self.entries[pos].1.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether `property` is recorded at `index`
    pub fn contains(&self, property: &P, index: usize) -> bool {
        self.position(property)
            .map_or(false, |pos| self.entries[pos].1.contains(&index))
    }

    /// The properties recorded at `index`
    pub fn properties_for(&self, index: usize) -> Vec<&P> {
        self.entries
            .iter()
            .filter(|(_, set)| set.contains(&index))
            .map(|(p, _)| p)
            .collect()
    }

    /// All properties currently in the store
    pub fn properties(&self) -> Vec<&P> {
        self.entries.iter().map(|(p, _)| p).collect()
    }

    /// Iterate over `(property, sorted indices)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&P, Vec<usize>)> {
        self.entries
            .iter()
            .map(|(p, set)| (p, set.iter().copied().collect()))
    }

    /// Renumber for a gap of `amount` opened at `start`.
    ///
    /// Every index `>= start` moves up by `amount`.
    pub fn shift_right(&mut self, start: usize, amount: usize) {
        if amount == 0 {
            return;
        }
        for (_, set) in self.entries.iter_mut() {
            *set = set
                .iter()
                .map(|&i| if i >= start { i + amount } else { i })
                .collect();
        }
    }

    /// Renumber for `amount` offsets removed at `start`.
    ///
    /// Indices inside `[start, start + amount)` are dropped and every index
    /// past the removed range moves down by `amount`.
    pub fn shift_left(&mut self, start: usize, amount: usize) {
        if amount == 0 {
            return;
        }
        let end = start + amount;
        for (_, set) in self.entries.iter_mut() {
            *set = set
                .iter()
                .filter(|&&i| i < start || i >= end)
                .map(|&i| if i >= end { i - amount } else { i })
                .collect();
        }
        self.entries.retain(|(_, set)| !set.is_empty());
    }

    /// Merge `other` into this store with its indices moved by `offset`.
    pub fn update(&mut self, other: &IndexOperations<P>, offset: usize) {
        for (property, set) in &other.entries {
            self.add(property.clone(), set.iter().map(|i| i + offset));
        }
    }

    /// Copy out the entries inside `[offset, offset + size)`, re-based to zero.
    pub fn window(&self, offset: usize, size: usize) -> IndexOperations<P> {
        let mut copy = IndexOperations::new();
        for (property, set) in &self.entries {
            let local: BTreeSet<usize> = set.range(offset..offset + size).map(|i| i - offset).collect();
            if !local.is_empty() {
                copy.entries.push((property.clone(), local));
            }
        }
        copy
    }

    /// Number of distinct indices covered by any property
    pub fn size(&self) -> usize {
        let all: BTreeSet<usize> = self.entries.iter().flat_map(|(_, set)| set.iter().copied()).collect();
        all.len()
    }

    /// Check whether the store holds no indices
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every property
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A window `[offset, offset + size)` onto a base store.
///
/// `S` is either a shared or a mutable borrow of the base store. All indices
/// passed to and returned from a view are local to the window.
#[derive(Debug)]
pub struct IndexOperationsView<S> {
    base: S,
    offset: usize,
    size: usize,
}

impl<S> IndexOperationsView<S> {
    /// Create a view of `base` covering `[offset, offset + size)`
    pub fn new(base: S, offset: usize, size: usize) -> Self {
        Self { base, offset, size }
    }

    /// Offset of the window in the base store
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the window
    pub fn len(&self) -> usize {
        self.size
    }

    /// Check whether the window is empty
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn globalize(&self, local: &[usize]) -> Vec<usize> {
        local
            .iter()
            .filter(|&&i| i < self.size)
            .map(|i| i + self.offset)
            .collect()
    }

    fn localize(&self, global: Vec<usize>) -> Vec<usize> {
        global
            .into_iter()
            .filter(|&i| i >= self.offset && i < self.offset + self.size)
            .map(|i| i - self.offset)
            .collect()
    }
}

impl<P, S> IndexOperationsView<S>
where
    P: IndexProperty,
    S: Deref<Target = IndexOperations<P>>,
{
    /// Local indices recorded for `property` inside the window
    pub fn indices(&self, property: &P) -> Vec<usize> {
        self.localize(self.base.indices(property))
    }

    /// Iterate over `(property, local indices)` for properties present in the window
    pub fn iter<'a>(&'a self) -> impl Iterator<Item = (&'a P, Vec<usize>)> + 'a
    where
        P: 'a,
    {
        self.base.iter().filter_map(move |(p, global)| {
            let local = self.localize(global);
            (!local.is_empty()).then_some((p, local))
        })
    }

    /// The properties present inside the window
    pub fn properties(&self) -> Vec<P> {
        self.iter().map(|(p, _)| p.clone()).collect()
    }

    /// The properties recorded at local `index`
    pub fn properties_for(&self, index: usize) -> Vec<&P> {
        if index >= self.size {
            return Vec::new();
        }
        self.base.properties_for(index + self.offset)
    }

    /// Number of distinct window indices covered by any property
    pub fn size(&self) -> usize {
        let window = self.offset..self.offset + self.size;
        let mut covered: BTreeSet<usize> = BTreeSet::new();
        for (_, set) in self.base.entries.iter() {
            covered.extend(set.range(window.clone()));
        }
        covered.len()
    }

    /// Copy the window out into a standalone store
    pub fn to_owned_store(&self) -> IndexOperations<P> {
        self.base.window(self.offset, self.size)
    }
}

impl<P, S> IndexOperationsView<S>
where
    P: IndexProperty,
    S: DerefMut<Target = IndexOperations<P>>,
{
    /// Record `property` for local `indices`; see [`IndexOperations::add`].
    pub fn add(&mut self, property: P, indices: &[usize]) -> Vec<usize> {
        let global = self.globalize(indices);
        let overridden = self.base.add(property, global);
        self.localize(overridden)
    }

    /// Remove local `indices` from `property`, returning those that were present.
    pub fn remove(&mut self, property: &P, indices: &[usize]) -> Vec<usize> {
        let global = self.globalize(indices);
        let removed = self.base.remove(property, &global);
        self.localize(removed)
    }

    /// Remove every property from the whole window, returning the freed local indices.
    pub fn clear(&mut self) -> Vec<usize> {
        let all: Vec<usize> = (0..self.size).collect();
        let mut freed = BTreeSet::new();
        for property in self.properties() {
            freed.extend(self.remove(&property, &all));
        }
        freed.into_iter().collect()
    }
}

//! a wrapper around [hashbrown::HashMap] to accomodate for the limitations of
//! the current `Borrow` trait. This could be also solved by a GATified version
//! of the `Borrow` trait in std
use std::{borrow::Borrow, hash::*};

use hashbrown::HashMap;

/// A wrapper around [hashbrown::HashMap] because it's impossible to implement
/// Borrow<(&Left, &Right)> for (Left, Right) so we would have to clone both
/// halves of a (label name, label value) pair for every
/// [HashMap::get][hashbrown::HashMap::get] call
///
/// For the Borrow trait to work with references to tuple elements it needs to
/// be GATified
#[derive(Debug)]
pub struct PairMap<T, U, V> {
    /// the map object we're wrapping
    inner: HashMap<(T, U), V>,
}

impl<T, U, V> PairMap<T, U, V> {
    /// Creates an empty `PairMap`
    pub fn new() -> Self {
        Self { inner: HashMap::new() }
    }

    /// Returns the number of entries in the map
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the map contains no entries
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Visits every entry as `(&left, &right, &value)` in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = (&T, &U, &V)> {
        self.inner.iter().map(|((left, right), v)| (left, right, v))
    }

    /// Keeps only the entries for which `f` returns true
    pub fn retain(&mut self, mut f: impl FnMut(&T, &U, &mut V) -> bool) {
        self.inner.retain(|(left, right), v| f(left, right, v));
    }
}

impl<T, U, V> Default for PairMap<T, U, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, U, V> PairMap<T, U, V> {
    /// Inserts a key-value pair into the `PairMap`
    pub fn insert(&mut self, left: T, right: U, v: V) -> Option<V>
    where
        T: Hash + Eq,
        U: Hash + Eq,
    {
        self.inner.insert((left, right), v)
    }

    /// Returns a reference to the value corresponding to the key pair
    pub fn get<Q, R>(&self, left: &Q, right: &R) -> Option<&V>
    where
        T: Borrow<Q>,
        U: Borrow<R>,
        Q: ?Sized + Hash + Eq,
        R: ?Sized + Hash + Eq,
    {
        let mut hasher = self.inner.hasher().build_hasher();
        (left, right).hash(&mut hasher);
        let hash = hasher.finish();
        self.inner
            .raw_entry()
            .from_hash(hash, |(l, r)| (l.borrow(), r.borrow()) == (left, right))
            .map(|(_, v)| v)
    }

    /// Returns true if the map contains a value for the specified key pair
    pub fn contains<Q, R>(&self, left: &Q, right: &R) -> bool
    where
        T: Borrow<Q>,
        U: Borrow<R>,
        Q: ?Sized + Hash + Eq,
        R: ?Sized + Hash + Eq,
    {
        self.get(left, right).is_some()
    }
}

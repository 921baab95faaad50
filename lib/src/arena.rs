//! Insertion-ordered, id-keyed storage.

use std::ops::{Index, IndexMut};

/// An arena that hands out stable ids and iterates in insertion
/// order. Removal is `O(n)`.
#[derive(Debug, PartialEq)]
pub struct Arena<Id: IdLike + Copy + Eq, T> {
    inner: Vec<(Id, T)>,
    next_id: Id,
}

impl<Id: IdLike + Copy + Eq, T> Arena<Id, T> {
    pub fn new() -> Self {
        Self {
            inner: Vec::new(),
            next_id: Id::from_raw(0),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn push(&mut self, x: T) -> Id {
        let id = self.next_id;
        self.next_id = Id::from_raw(self.next_id.into_raw() + 1);
        self.inner.push((id, x));
        id
    }

    pub fn remove(&mut self, id: Id) -> Option<T> {
        let pos = self.inner.iter().position(|(i, _)| *i == id)?;
        Some(self.inner.remove(pos).1)
    }

    pub fn get(&self, id: Id) -> Option<&T> {
        self.inner.iter().find(|(i, _)| *i == id).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, id: Id) -> Option<&mut T> {
        self.inner.iter_mut().find(|(i, _)| *i == id).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id, &T)> {
        self.inner.iter().map(|(i, v)| (*i, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Id, &mut T)> {
        self.inner.iter_mut().map(|(i, v)| (*i, v))
    }
}

impl<Id: IdLike + Copy + Eq, T> Default for Arena<Id, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: IdLike + Copy + Eq, T> Index<Id> for Arena<Id, T> {
    type Output = T;

    fn index(&self, index: Id) -> &Self::Output {
        match self.get(index) {
            Some(v) => v,
            None => panic!("Arena::index: no entry for id {}", index.into_raw()),
        }
    }
}

impl<Id: IdLike + Copy + Eq, T> IndexMut<Id> for Arena<Id, T> {
    fn index_mut(&mut self, index: Id) -> &mut Self::Output {
        let raw = index.into_raw();
        match self.get_mut(index) {
            Some(v) => v,
            None => panic!("Arena::index_mut: no entry for id {raw}"),
        }
    }
}

pub trait IdLike {
    fn from_raw(index: usize) -> Self;
    fn into_raw(self) -> usize;
}

#[cfg(test)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct TestId(usize);

#[cfg(test)]
impl IdLike for TestId {
    fn from_raw(index: usize) -> Self {
        Self(index)
    }

    fn into_raw(self) -> usize {
        self.0
    }
}

#[test]
fn arena_keeps_insertion_order_across_removal() {
    let mut arena: Arena<TestId, &str> = Arena::new();
    let a = arena.push("a");
    let b = arena.push("b");
    let c = arena.push("c");
    assert_eq!(arena.remove(b), Some("b"));
    assert_eq!(arena.remove(b), None);
    let d = arena.push("d");
    assert_ne!(d, b);
    let order: Vec<_> = arena.iter().map(|(_, v)| *v).collect();
    assert_eq!(order, vec!["a", "c", "d"]);
    arena[c] = "C";
    assert_eq!(arena[c], "C");
    assert_eq!(arena[a], "a");
    assert_eq!(arena.len(), 3);
}

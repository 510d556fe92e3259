//! Typed indices and the vectors they index into

use std::{fmt::Debug, hash::Hash, marker::PhantomData};

/// A dense `u32` handle into an [`IndexVec`]
pub trait Index: Copy + 'static + Eq + Debug + Hash {
    fn new(index: usize) -> Self;

    fn index(self) -> usize;
}

macro_rules! simple_index {
    ($(#[$attr:meta])* $vis:vis struct $name:ident;) => {
        $(#[$attr])*
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
        $vis struct $name(u32);

        impl $crate::index::Index for $name {
            fn new(index: usize) -> Self {
                Self(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

pub(crate) use simple_index;

/// An append-only vector addressed by a typed index `I`
#[derive(Clone)]
pub struct IndexVec<I: Index, T> {
    items: Vec<T>,
    _index: PhantomData<fn(&I)>,
}

impl<I: Index, T> IndexVec<I, T> {
    pub const fn new() -> Self {
        Self {
            items: Vec::new(),
            _index: PhantomData,
        }
    }

    /// Appends `item` and returns its index
    pub fn push(&mut self, item: T) -> I {
        let index = I::new(self.items.len());
        self.items.push(item);
        index
    }

    pub fn get(&self, index: I) -> Option<&T> {
        self.items.get(index.index())
    }

    pub fn enumerate(&self) -> impl Iterator<Item = (I, &T)> {
        self.items.iter().enumerate().map(|(index, item)| (I::new(index), item))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<I: Index, T> Default for IndexVec<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Index, T: Debug> Debug for IndexVec<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.enumerate()).finish()
    }
}

impl<I: Index, T> core::ops::Index<I> for IndexVec<I, T> {
    type Output = T;

    fn index(&self, index: I) -> &T {
        &self.items[index.index()]
    }
}

impl<I: Index, T> core::ops::IndexMut<I> for IndexVec<I, T> {
    fn index_mut(&mut self, index: I) -> &mut T {
        &mut self.items[index.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    simple_index! {
        struct SlotId;
    }

    #[test]
    fn pushes_hand_out_sequential_handles() {
        let mut slots: IndexVec<SlotId, &str> = IndexVec::new();

        let first = slots.push("first");
        let second = slots.push("second");

        assert_eq!(first, SlotId::new(0));
        assert_eq!(slots[second], "second");
        assert_eq!(slots.get(SlotId::new(2)), None);
        assert_eq!(
            slots.enumerate().map(|(id, _)| id.index()).collect::<Vec<_>>(),
            [0, 1]
        );
    }
}

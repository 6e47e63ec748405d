use std::{
    fmt,
    marker::PhantomData,
    ops::{Index, IndexMut},
};

/// Handle to an element stored in an [`Arena`].
///
/// Handles replace the raw `prev`/`next` pointers an intrusive list would use.
/// They are plain indices, so they can be copied freely and even written into
/// the managed memory itself.
pub(crate) struct Id<T> {
    index: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    pub(crate) const fn new(index: u32) -> Self {
        Self {
            index,
            marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.index as usize
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

/// Growable table owning every element it hands out handles for.
///
/// Removed slots are recycled by later insertions, so a stale handle may end
/// up naming a different element. Callers that accept handles from untrusted
/// places must validate what they find behind them.
pub(crate) struct Arena<T> {
    slots: Vec<Option<T>>,
    vacant: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn insert(&mut self, value: T) -> Id<T> {
        self.len += 1;

        if let Some(index) = self.vacant.pop() {
            self.slots[index as usize] = Some(value);
            return Id::new(index);
        }

        let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| {
            panic!("arena cannot hold more than {} elements", u32::MAX)
        });
        self.slots.push(Some(value));
        Id::new(index)
    }

    /// Handle the next [`Arena::insert`] will return.
    pub(crate) fn next_id(&self) -> Id<T> {
        match self.vacant.last() {
            Some(index) => Id::new(*index),
            None => Id::new(self.slots.len() as u32),
        }
    }

    pub(crate) fn remove(&mut self, id: Id<T>) -> Option<T> {
        let value = self.slots.get_mut(id.index())?.take()?;
        self.vacant.push(id.index);
        self.len -= 1;
        Some(value)
    }

    #[inline]
    pub(crate) fn get(&self, id: Id<T>) -> Option<&T> {
        self.slots.get(id.index())?.as_ref()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| Some((Id::new(index as u32), slot.as_ref()?)))
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    /// Panics when the handle names a vacant slot. Internal handles always
    /// point at live elements, so this indicates a corrupted ledger.
    #[inline]
    fn index(&self, id: Id<T>) -> &T {
        match self.get(id) {
            Some(value) => value,
            None => panic!("dangling arena handle {id:?}"),
        }
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut T {
        match self.slots.get_mut(id.index()).and_then(Option::as_mut) {
            Some(value) => value,
            None => panic!("dangling arena handle {id:?}"),
        }
    }
}

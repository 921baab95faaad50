//! Synchronous observer lists.

use std::fmt;

use crate::arena::{Arena, IdLike};

/// Handle returned by [`Emitter::add_listener`], used to remove the
/// listener again.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ListenerId(u64);

impl IdLike for ListenerId {
    fn from_raw(index: usize) -> Self {
        Self(index as u64)
    }

    fn into_raw(self) -> usize {
        self.0 as usize
    }
}

pub type Listener<T> = Box<dyn FnMut(&T) + Send>;

/// A list of callbacks notified in registration order, on the
/// emitting thread, before [`Emitter::emit`] returns.
pub struct Emitter<T: ?Sized> {
    listeners: Arena<ListenerId, Listener<T>>,
}

impl<T: ?Sized> Emitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arena::new(),
        }
    }

    pub fn add_listener(&mut self, listener: impl FnMut(&T) + Send + 'static) -> ListenerId {
        self.listeners.push(Box::new(listener))
    }

    /// Returns `false` if the listener was already removed.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn emit(&mut self, value: &T) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(value);
        }
    }
}

impl<T: ?Sized> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[test]
fn emitter_delivers_in_registration_order() {
    use std::sync::Arc;

    use parking_lot::Mutex;

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut emitter: Emitter<u32> = Emitter::new();
    let l1 = log.clone();
    let first = emitter.add_listener(move |v| l1.lock().push(("first", *v)));
    let l2 = log.clone();
    emitter.add_listener(move |v| l2.lock().push(("second", *v)));

    emitter.emit(&7);
    assert!(emitter.remove_listener(first));
    assert!(!emitter.remove_listener(first));
    emitter.emit(&8);

    assert_eq!(
        *log.lock(),
        vec![("first", 7), ("second", 7), ("second", 8)]
    );
}

//! An observable ordered collection with frozen snapshot views.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::dispatch::{Dispatcher, LockedListenerError};

/// An immutable view of a collection's elements.
///
/// A fresh snapshot is produced after every mutation, so one you are holding
/// never changes under you; readers inside event handlers always see the
/// state the event describes. It derefs to a slice, which is where all the
/// sequence operations (`iter`, `contains`, `first`, and friends) come from.
pub struct Snapshot<T>(Rc<[T]>);

impl<T> Snapshot<T> {
    pub fn empty() -> Self {
        Snapshot(Vec::new().into())
    }
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Snapshot(self.0.clone())
    }
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: Clone> From<&[T]> for Snapshot<T> {
    fn from(elements: &[T]) -> Self {
        Snapshot(elements.into())
    }
}

impl<T> From<Vec<T>> for Snapshot<T> {
    fn from(elements: Vec<T>) -> Self {
        Snapshot(elements.into())
    }
}

impl<'a, T> IntoIterator for &'a Snapshot<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T: PartialEq> PartialEq for Snapshot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

impl<T: PartialEq> PartialEq<Vec<T>> for Snapshot<T> {
    fn eq(&self, other: &Vec<T>) -> bool {
        self.0[..] == other[..]
    }
}

impl<T: PartialEq> PartialEq<[T]> for Snapshot<T> {
    fn eq(&self, other: &[T]) -> bool {
        self.0[..] == *other
    }
}

impl<T: fmt::Debug> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

/// What a [`Collection`] tells its listeners. Every handler has an empty
/// default body; implement the ones you want.
///
/// Handlers run *after* the collection and its snapshot are already
/// consistent, and the `elements` argument is exactly the subsequence whose
/// membership actually changed, in call order.
pub trait CollectionListener<T> {
    fn on_added(&self, elements: &[T]) {
        let _ = elements;
    }

    fn on_removed(&self, elements: &[T]) {
        let _ = elements;
    }

    fn on_cleared(&self) {}

    fn on_sorted(&self) {}
}

struct State<T> {
    elements: Vec<T>,
    frozen: Snapshot<T>,
}

struct CollectionCore<T: 'static> {
    state: RefCell<State<T>>,
    dispatcher: Dispatcher<dyn CollectionListener<T>>,
}

/// An ordered, duplicate-free observable sequence.
///
/// This is a cheap-clone handle; clones share the same underlying
/// collection. Element equality decides duplicate-ness, and for the handle
/// types in this crate ([`Entity`](crate::entities::Entity),
/// [`Comp`](crate::component::Comp), [`System`](crate::system::System))
/// equality is reference identity, so "the same element" means the same
/// object, not a lookalike.
///
/// Mutations finish updating internal state and refresh the frozen snapshot
/// before any listener hears about them, so a handler that mutates this
/// collection again simply nests: the inner mutation (and its events)
/// completes before the outer dispatch resumes.
pub struct Collection<T: 'static> {
    core: Rc<CollectionCore<T>>,
}

impl<T: Clone + PartialEq + 'static> Collection<T> {
    pub fn new() -> Self {
        Self {
            core: Rc::new(CollectionCore {
                state: RefCell::new(State {
                    elements: Vec::new(),
                    frozen: Snapshot::empty(),
                }),
                dispatcher: Dispatcher::new(),
            }),
        }
    }

    /// Append `element` if not already present. Returns whether it was
    /// added; one `on_added` fires on success.
    pub fn add(&self, element: T) -> bool {
        self.add_all([element])
    }

    /// Append each element not already present, in argument order.
    /// Duplicates within the arguments collapse to their first occurrence.
    /// One `on_added` fires with the subsequence actually added; nothing
    /// fires when nothing changed.
    pub fn add_all(&self, elements: impl IntoIterator<Item = T>) -> bool {
        let added: Vec<T> = {
            let mut state = self.core.state.borrow_mut();
            let mut added = Vec::new();
            for element in elements {
                if state.elements.iter().any(|present| *present == element) {
                    continue;
                }
                state.elements.push(element.clone());
                added.push(element);
            }
            if !added.is_empty() {
                state.frozen = Snapshot::from(state.elements.as_slice());
            }
            added
        };
        if added.is_empty() {
            return false;
        }
        self.core.dispatcher.dispatch(|l| l.on_added(&added));
        true
    }

    /// Remove `element` if present. One `on_removed` fires on success.
    pub fn remove(&self, element: &T) -> bool {
        self.remove_all(std::slice::from_ref(element))
    }

    /// Remove each listed element that is present. Unknown elements are
    /// skipped silently. One `on_removed` fires with the subsequence
    /// actually removed, in argument order.
    pub fn remove_all(&self, elements: &[T]) -> bool {
        let removed: Vec<T> = {
            let mut state = self.core.state.borrow_mut();
            let mut removed = Vec::new();
            for element in elements {
                if let Some(at) = state.elements.iter().position(|e| e == element) {
                    removed.push(state.elements.remove(at));
                }
            }
            if !removed.is_empty() {
                state.frozen = Snapshot::from(state.elements.as_slice());
            }
            removed
        };
        if removed.is_empty() {
            return false;
        }
        self.core.dispatcher.dispatch(|l| l.on_removed(&removed));
        true
    }

    /// Remove the element at `index`. Out of range is a silent no-op.
    pub fn remove_at(&self, index: usize) -> bool {
        self.remove_indices(&[index])
    }

    /// Remove the elements at the given indices. Indices are resolved to
    /// elements against the state at the start of the call, so they are not
    /// invalidated by earlier removals in the same batch. Out-of-range
    /// indices are skipped silently.
    pub fn remove_indices(&self, indices: &[usize]) -> bool {
        let targets: Vec<T> = {
            let state = self.core.state.borrow();
            indices
                .iter()
                .filter_map(|&index| state.elements.get(index).cloned())
                .collect()
        };
        if targets.is_empty() {
            return false;
        }
        self.remove_all(&targets)
    }

    /// Drop every element. No-op (and no event) when already empty;
    /// otherwise one `on_cleared` fires.
    pub fn clear(&self) {
        let cleared = {
            let mut state = self.core.state.borrow_mut();
            if state.elements.is_empty() {
                false
            } else {
                state.elements.clear();
                state.frozen = Snapshot::empty();
                true
            }
        };
        if cleared {
            self.core.dispatcher.dispatch(|l| l.on_cleared());
        }
    }

    /// Sort by natural order. See [`Collection::sort_by`].
    pub fn sort(&self)
    where
        T: Ord,
    {
        self.sort_by(|a, b| a.cmp(b));
    }

    /// Stable in-place sort with the caller's comparator. No-op on an empty
    /// collection; otherwise the snapshot refreshes and one `on_sorted`
    /// fires.
    pub fn sort_by(&self, mut compare: impl FnMut(&T, &T) -> Ordering) {
        let sorted = {
            let mut state = self.core.state.borrow_mut();
            if state.elements.is_empty() {
                false
            } else {
                state.elements.sort_by(|a, b| compare(a, b));
                state.frozen = Snapshot::from(state.elements.as_slice());
                true
            }
        };
        if sorted {
            self.core.dispatcher.dispatch(|l| l.on_sorted());
        }
    }

    /// The current frozen snapshot.
    pub fn elements(&self) -> Snapshot<T> {
        self.core.state.borrow().frozen.clone()
    }

    pub fn len(&self) -> usize {
        self.core.state.borrow().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.state.borrow().elements.is_empty()
    }

    pub fn contains(&self, element: &T) -> bool {
        self.index_of(element).is_some()
    }

    /// Index of the unique occurrence of `element`, if present.
    pub fn index_of(&self, element: &T) -> Option<usize> {
        self.core
            .state
            .borrow()
            .elements
            .iter()
            .position(|e| e == element)
    }

    pub fn add_listener(&self, listener: Rc<dyn CollectionListener<T>>, lock: bool) -> bool {
        self.core.dispatcher.add_listener(listener, lock)
    }

    pub fn remove_listener(
        &self,
        listener: &Rc<dyn CollectionListener<T>>,
    ) -> Result<bool, LockedListenerError> {
        self.core.dispatcher.remove_listener(listener)
    }

    pub fn remove_listener_at(&self, index: usize) -> Result<bool, LockedListenerError> {
        self.core.dispatcher.remove_listener_at(index)
    }

    /// The underlying listener table, for keyed registration and snapshots.
    pub fn dispatcher(&self) -> &Dispatcher<dyn CollectionListener<T>> {
        &self.core.dispatcher
    }
}

impl<T: 'static> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: 'static> PartialEq for Collection<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl<T: Clone + PartialEq + 'static> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Collection")
            .field(&self.core.state.borrow().elements)
            .finish()
    }
}

//! Components, the kind descriptors that identify them, and the per-entity
//! container with its type-indexed cache.

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use downcast::{downcast, Any};
use smol_str::SmolStr;

use crate::collection::{Collection, CollectionListener, Snapshot};
use crate::ClassId;

/// Data attachable to an [`Entity`](crate::entities::Entity). The crate
/// treats component values as opaque; all the behavior lives in systems and
/// listeners.
///
/// A component type may carry a stable string tag. Types sharing a tag count
/// as the same *kind* when matching, letting unrelated Rust types stand in
/// for one conceptual component (say, every status effect tagged
/// `"status"`). Untagged types match by concrete type identity.
pub trait Component: Any {
    fn type_tag() -> Option<&'static str>
    where
        Self: Sized,
    {
        None
    }
}
downcast!(dyn Component);

/// A component kind descriptor: a concrete class, a bare string tag, or a
/// class that also carries its tag. This is what aspect constraints and
/// container queries are made of.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Kind {
    class: Option<ClassId>,
    tag: Option<SmolStr>,
}

impl Kind {
    /// The kind of a concrete component type, tag included if the type
    /// declares one.
    pub fn of<C: Component>() -> Kind {
        Kind {
            class: Some(ClassId::of::<C>()),
            tag: C::type_tag().map(SmolStr::new),
        }
    }

    /// A bare tag kind. Matches any component whose type carries this tag,
    /// regardless of its Rust type.
    pub fn tag(tag: impl Into<SmolStr>) -> Kind {
        Kind {
            class: None,
            tag: Some(tag.into()),
        }
    }

    /// Whether a component of kind `self` satisfies a query for `query`.
    ///
    /// Tags win: when both sides carry one, the tags decide. Otherwise it
    /// comes down to class identity, and a side with no class never
    /// matches.
    pub(crate) fn satisfies(&self, query: &Kind) -> bool {
        match (&self.tag, &query.tag) {
            (Some(own), Some(wanted)) => own == wanted,
            _ => match (&self.class, &query.class) {
                (Some(own), Some(wanted)) => own == wanted,
                _ => false,
            },
        }
    }

    /// The cache slot queries for this kind resolve through. Tagged kinds
    /// live under their tag.
    fn cache_key(&self) -> CacheKey {
        if let Some(tag) = &self.tag {
            CacheKey::Tag(tag.clone())
        } else {
            CacheKey::Class(self.class.expect("kind with neither class nor tag"))
        }
    }

    /// Every cache slot this kind touches: its tag and, when present, its
    /// class, so a rebuilt list is findable by either.
    fn cache_keys(&self) -> impl Iterator<Item = CacheKey> + '_ {
        self.class
            .map(CacheKey::Class)
            .into_iter()
            .chain(self.tag.iter().map(|t| CacheKey::Tag(t.clone())))
    }
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Kind");
        if let Some(class) = &self.class {
            d.field("class", class);
        }
        if let Some(tag) = &self.tag {
            d.field("tag", tag);
        }
        d.finish()
    }
}

/// A shared handle to a component value.
///
/// The concrete type is only statically known at construction, so that is
/// where the [`Kind`] gets captured. Equality is reference identity: two
/// `Comp`s made from equal values are different components, and clones of
/// one `Comp` are the same component.
pub struct Comp {
    value: Rc<dyn Component>,
    kind: Kind,
}

impl Comp {
    pub fn new<C: Component>(value: C) -> Comp {
        Comp {
            value: Rc::new(value),
            kind: Kind::of::<C>(),
        }
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// Whether this component's concrete type is `C`. Tags play no part
    /// here; this is exact.
    pub fn is<C: Component>(&self) -> bool {
        self.kind.class == Some(ClassId::of::<C>())
    }

    /// Typed access to the component value.
    pub fn get_as<C: Component>(&self) -> Option<&C> {
        self.value.downcast_ref::<C>().ok()
    }
}

impl Clone for Comp {
    fn clone(&self) -> Self {
        Comp {
            value: self.value.clone(),
            kind: self.kind.clone(),
        }
    }
}

impl PartialEq for Comp {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Comp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Comp").field(&self.kind).finish()
    }
}

impl<C: Component> From<C> for Comp {
    fn from(value: C) -> Self {
        Comp::new(value)
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum CacheKey {
    Class(ClassId),
    Tag(SmolStr),
}

#[derive(Default)]
struct TypeIndex {
    cache: RefCell<AHashMap<CacheKey, Snapshot<Comp>>>,
    dirty: RefCell<AHashSet<CacheKey>>,
}

/// Keeps the type index honest. Registered locked at construction, so no
/// amount of listener shuffling can detach the cache from the container.
struct IndexMaintainer {
    index: Weak<TypeIndex>,
}

impl IndexMaintainer {
    fn soil(&self, comps: &[Comp]) {
        if let Some(index) = self.index.upgrade() {
            let mut dirty = index.dirty.borrow_mut();
            for comp in comps {
                for key in comp.kind().cache_keys() {
                    dirty.insert(key);
                }
            }
        }
    }
}

impl CollectionListener<Comp> for IndexMaintainer {
    fn on_added(&self, comps: &[Comp]) {
        self.soil(comps);
    }

    fn on_removed(&self, comps: &[Comp]) {
        self.soil(comps);
    }

    fn on_cleared(&self) {
        if let Some(index) = self.index.upgrade() {
            index.cache.borrow_mut().clear();
            index.dirty.borrow_mut().clear();
        }
    }
}

/// An entity's components: an observable [`Collection`] of [`Comp`]s (which
/// it derefs to) plus a lazily rebuilt kind-indexed cache, so repeated
/// queries for the same kind don't rescan the container.
///
/// Several components of colliding kind may coexist;
/// [`ComponentContainer::get_all`] returns all of them in container order.
#[derive(Clone)]
pub struct ComponentContainer {
    collection: Collection<Comp>,
    index: Rc<TypeIndex>,
}

impl ComponentContainer {
    pub fn new() -> Self {
        let index = Rc::new(TypeIndex::default());
        let collection = Collection::new();
        collection.add_listener(
            Rc::new(IndexMaintainer {
                index: Rc::downgrade(&index),
            }),
            true,
        );
        Self { collection, index }
    }

    /// First component of type `C` (by kind, so tag matches count), if any.
    pub fn get<C: Component>(&self) -> Option<Comp> {
        self.get_by(&Kind::of::<C>())
    }

    /// Every component matching type `C`'s kind, in container order.
    pub fn get_all<C: Component>(&self) -> Snapshot<Comp> {
        self.get_all_by(&Kind::of::<C>())
    }

    pub fn get_by(&self, kind: &Kind) -> Option<Comp> {
        self.get_all_by(kind).first().cloned()
    }

    /// Every component matching `kind`, in container order.
    ///
    /// Served from the cache when clean; otherwise the list is rebuilt by
    /// filtering the container and stored under both the query's tag and
    /// class slots, so a later query by either is O(1).
    pub fn get_all_by(&self, kind: &Kind) -> Snapshot<Comp> {
        let key = kind.cache_key();
        if !self.index.dirty.borrow().contains(&key) {
            if let Some(hit) = self.index.cache.borrow().get(&key) {
                return hit.clone();
            }
        }

        let rebuilt: Vec<Comp> = self
            .collection
            .elements()
            .iter()
            .filter(|comp| comp.kind().satisfies(kind))
            .cloned()
            .collect();
        let fresh = Snapshot::from(rebuilt);

        let mut cache = self.index.cache.borrow_mut();
        let mut dirty = self.index.dirty.borrow_mut();
        for key in kind.cache_keys() {
            cache.insert(key.clone(), fresh.clone());
            dirty.remove(&key);
        }
        fresh
    }

    /// Whether at least one component matches `kind`.
    pub fn contains_kind(&self, kind: &Kind) -> bool {
        !self.get_all_by(kind).is_empty()
    }
}

impl Deref for ComponentContainer {
    type Target = Collection<Comp>;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}

impl Default for ComponentContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ComponentContainer {
    fn eq(&self, other: &Self) -> bool {
        self.collection == other.collection
    }
}

impl fmt::Debug for ComponentContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentContainer")
            .field(&self.collection)
            .finish()
    }
}

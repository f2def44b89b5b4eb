//! Entities: a caller-supplied identity plus an owned component container,
//! re-emitting container events at entity level.

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::collection::{Collection, CollectionListener};
use crate::component::{Comp, ComponentContainer};
use crate::dispatch::{Dispatcher, LockedListenerError};

/// An entity's identity, supplied by the caller. The crate never generates
/// ids and never deduplicates by them; two distinct entities may share an
/// id, and only [`EntityCollection::get`] cares.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum EntityId {
    Num(i64),
    Name(SmolStr),
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        EntityId::Num(id)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId::Name(SmolStr::new(id))
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId::Name(SmolStr::new(id))
    }
}

impl From<SmolStr> for EntityId {
    fn from(id: SmolStr) -> Self {
        EntityId::Name(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Num(n) => write!(f, "{}", n),
            EntityId::Name(s) => write!(f, "{}", s),
        }
    }
}

/// Entity-level component events, mirroring what the entity's container
/// just did. All handlers default to nothing.
pub trait EntityListener {
    fn on_added_components(&self, comps: &[Comp]) {
        let _ = comps;
    }

    fn on_removed_components(&self, comps: &[Comp]) {
        let _ = comps;
    }

    fn on_cleared_components(&self) {}

    fn on_sorted_components(&self) {}
}

pub(crate) struct EntityCore {
    id: EntityId,
    components: ComponentContainer,
    dispatcher: Dispatcher<dyn EntityListener>,
}

/// Forwards container events to the entity's own listeners. Holds the
/// entity weakly; the container already lives inside the entity, and a
/// strong edge back would cycle.
struct Reemit {
    entity: Weak<EntityCore>,
}

impl CollectionListener<Comp> for Reemit {
    fn on_added(&self, comps: &[Comp]) {
        if let Some(entity) = self.entity.upgrade() {
            entity.dispatcher.dispatch(|l| l.on_added_components(comps));
        }
    }

    fn on_removed(&self, comps: &[Comp]) {
        if let Some(entity) = self.entity.upgrade() {
            entity
                .dispatcher
                .dispatch(|l| l.on_removed_components(comps));
        }
    }

    fn on_cleared(&self) {
        if let Some(entity) = self.entity.upgrade() {
            entity.dispatcher.dispatch(|l| l.on_cleared_components());
        }
    }

    fn on_sorted(&self) {
        if let Some(entity) = self.entity.upgrade() {
            entity.dispatcher.dispatch(|l| l.on_sorted_components());
        }
    }
}

/// An identified holder of components.
///
/// Cheap-clone handle; equality is reference identity, never id equality.
/// The re-emit wiring from the container to the entity is registered locked
/// at construction and cannot be unplugged.
pub struct Entity {
    core: Rc<EntityCore>,
}

impl Entity {
    pub fn new(id: impl Into<EntityId>) -> Entity {
        let core = Rc::new_cyclic(|weak: &Weak<EntityCore>| {
            let components = ComponentContainer::new();
            components.add_listener(
                Rc::new(Reemit {
                    entity: weak.clone(),
                }),
                true,
            );
            EntityCore {
                id: id.into(),
                components,
                dispatcher: Dispatcher::new(),
            }
        });
        Entity { core }
    }

    pub fn id(&self) -> &EntityId {
        &self.core.id
    }

    pub fn components(&self) -> &ComponentContainer {
        &self.core.components
    }

    pub fn add_listener(&self, listener: Rc<dyn EntityListener>, lock: bool) -> bool {
        self.core.dispatcher.add_listener(listener, lock)
    }

    pub fn remove_listener(
        &self,
        listener: &Rc<dyn EntityListener>,
    ) -> Result<bool, LockedListenerError> {
        self.core.dispatcher.remove_listener(listener)
    }

    pub fn dispatcher(&self) -> &Dispatcher<dyn EntityListener> {
        &self.core.dispatcher
    }

    pub(crate) fn downgrade(&self) -> WeakEntity {
        WeakEntity(Rc::downgrade(&self.core))
    }
}

impl Clone for Entity {
    fn clone(&self) -> Self {
        Entity {
            core: self.core.clone(),
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.core.id)
            .field("components", &self.core.components.len())
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakEntity(Weak<EntityCore>);

impl WeakEntity {
    pub fn upgrade(&self) -> Option<Entity> {
        self.0.upgrade().map(|core| Entity { core })
    }
}

type IdIndexMap = IndexMap<EntityId, Entity, ahash::RandomState>;

/// Maintains the id index from inside the collection's own listener list,
/// so the index is already consistent by the time later listeners (aspects,
/// engines) observe a membership event.
struct IdIndexer {
    index: Weak<RefCell<IdIndexMap>>,
}

impl CollectionListener<Entity> for IdIndexer {
    fn on_added(&self, entities: &[Entity]) {
        if let Some(index) = self.index.upgrade() {
            let mut index = index.borrow_mut();
            for entity in entities {
                // Contested ids: last added wins the lookup slot.
                index.insert(entity.id().clone(), entity.clone());
            }
        }
    }

    fn on_removed(&self, entities: &[Entity]) {
        if let Some(index) = self.index.upgrade() {
            let mut index = index.borrow_mut();
            for entity in entities {
                // Only un-index the exact handle; a same-id sibling keeps
                // its slot.
                if index.get(entity.id()) == Some(entity) {
                    index.shift_remove(entity.id());
                }
            }
        }
    }

    fn on_cleared(&self) {
        if let Some(index) = self.index.upgrade() {
            index.borrow_mut().clear();
        }
    }
}

/// A [`Collection`] of entities (which it derefs to) with an id index for
/// lookup. Membership in the collection is the source of truth; the index
/// owns nothing.
#[derive(Clone)]
pub struct EntityCollection {
    collection: Collection<Entity>,
    index: Rc<RefCell<IdIndexMap>>,
}

impl EntityCollection {
    pub fn new() -> Self {
        let index: Rc<RefCell<IdIndexMap>> = Rc::new(RefCell::new(IndexMap::default()));
        let collection = Collection::new();
        collection.add_listener(
            Rc::new(IdIndexer {
                index: Rc::downgrade(&index),
            }),
            true,
        );
        Self { collection, index }
    }

    /// Look up an entity by id.
    pub fn get(&self, id: impl Into<EntityId>) -> Option<Entity> {
        self.index.borrow().get(&id.into()).cloned()
    }
}

impl Deref for EntityCollection {
    type Target = Collection<Entity>;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}

impl Default for EntityCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for EntityCollection {
    fn eq(&self, other: &Self) -> bool {
        self.collection == other.collection
    }
}

impl fmt::Debug for EntityCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityCollection")
            .field(&self.collection)
            .finish()
    }
}

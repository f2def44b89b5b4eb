//! Live filtered views over an entity collection.
//!
//! An [`Aspect`] watches an [`EntityCollection`] and keeps a filtered subset
//! of it continuously correct under arbitrary mutation: entities coming and
//! going on the source, components coming and going on the entities. It
//! does this with two pieces of wiring:
//!
//! - one listener on the source collection, reacting to membership events;
//! - one listener per source entity, reacting to that entity's component
//!   events and re-evaluating just that entity.
//!
//! Per-entity listeners are registered under the aspect's process-unique id
//! and locked, so any number of aspects can watch the same entity without
//! stepping on each other, and nobody but the owning aspect can unplug its
//! slot. `detach` removes every piece of wiring deterministically.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::collection::{CollectionListener, Snapshot};
use crate::component::{Comp, Kind};
use crate::dispatch::{Dispatcher, LockedListenerError};
use crate::entities::{Entity, EntityCollection, EntityListener, WeakEntity};
use crate::next_unit_id;

/// What an [`Aspect`] tells its listeners. All handlers default to nothing.
///
/// Membership events (`on_added_entities`, …) fire only when the filtered
/// set actually changed. Component events (`on_added_components`, …) are
/// re-emitted for matched and unmatched entities alike, so listeners can
/// track churn without keeping their own shadow state.
pub trait AspectListener {
    fn on_attached(&self) {}

    fn on_detached(&self) {}

    fn on_added_entities(&self, entities: &[Entity]) {
        let _ = entities;
    }

    fn on_removed_entities(&self, entities: &[Entity]) {
        let _ = entities;
    }

    fn on_cleared_entities(&self) {}

    fn on_sorted_entities(&self) {}

    fn on_added_components(&self, entity: &Entity, comps: &[Comp]) {
        let _ = (entity, comps);
    }

    fn on_removed_components(&self, entity: &Entity, comps: &[Comp]) {
        let _ = (entity, comps);
    }

    fn on_cleared_components(&self, entity: &Entity) {
        let _ = entity;
    }

    fn on_sorted_components(&self, entity: &Entity) {
        let _ = entity;
    }
}

/// A constraint triple, for handing to things that build aspects
/// (notably [`EntityProcessingSystem`](crate::system::EntityProcessingSystem)).
#[derive(Clone, Debug, Default)]
pub struct Constraints {
    pub(crate) all: Vec<Kind>,
    pub(crate) exclude: Vec<Kind>,
    pub(crate) one: Vec<Kind>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(mut self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.all = dedup_kinds(kinds);
        self
    }

    pub fn exclude(mut self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.exclude = dedup_kinds(kinds);
        self
    }

    pub fn one(mut self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.one = dedup_kinds(kinds);
        self
    }
}

/// First occurrence wins.
fn dedup_kinds(kinds: impl IntoIterator<Item = Kind>) -> Vec<Kind> {
    let mut out = Vec::new();
    for kind in kinds {
        if !out.contains(&kind) {
            out.push(kind);
        }
    }
    out
}

/// The matching predicate: every `all` kind present, no `exclude` kind
/// present, and (when `one` is non-empty) at least one `one` kind present.
/// An empty triple matches every entity, component-less ones included.
fn constraint_match(all: &[Kind], exclude: &[Kind], one: &[Kind], entity: &Entity) -> bool {
    let comps = entity.components();
    all.iter().all(|kind| comps.contains_kind(kind))
        && !exclude.iter().any(|kind| comps.contains_kind(kind))
        && (one.is_empty() || one.iter().any(|kind| comps.contains_kind(kind)))
}

#[derive(Default)]
struct AspectState {
    all: Vec<Kind>,
    exclude: Vec<Kind>,
    one: Vec<Kind>,
    filtered: Vec<Entity>,
    frozen: Snapshot<Entity>,
    attached: bool,
}

struct AspectCore {
    id: u64,
    source: EntityCollection,
    state: RefCell<AspectState>,
    dispatcher: Dispatcher<dyn AspectListener>,
}

/// Receives the source collection's membership events. Holds the aspect
/// weakly; the aspect already holds the source.
struct SourceBridge {
    aspect: Weak<AspectCore>,
}

impl CollectionListener<Entity> for SourceBridge {
    fn on_added(&self, entities: &[Entity]) {
        if let Some(core) = self.aspect.upgrade() {
            Aspect::source_added(&core, entities);
        }
    }

    fn on_removed(&self, entities: &[Entity]) {
        if let Some(core) = self.aspect.upgrade() {
            Aspect::source_removed(&core, entities);
        }
    }

    fn on_cleared(&self) {
        if let Some(core) = self.aspect.upgrade() {
            Aspect::source_cleared(&core);
        }
    }

    fn on_sorted(&self) {
        if let Some(core) = self.aspect.upgrade() {
            Aspect::source_sorted(&core);
        }
    }
}

/// The per-entity listener, keyed by aspect id on the entity's dispatcher.
struct EntityBridge {
    aspect: Weak<AspectCore>,
    entity: WeakEntity,
}

impl EntityBridge {
    fn both(&self) -> Option<(Rc<AspectCore>, Entity)> {
        Some((self.aspect.upgrade()?, self.entity.upgrade()?))
    }
}

impl EntityListener for EntityBridge {
    fn on_added_components(&self, comps: &[Comp]) {
        if let Some((core, entity)) = self.both() {
            Aspect::entity_components_added(&core, &entity, comps);
        }
    }

    fn on_removed_components(&self, comps: &[Comp]) {
        if let Some((core, entity)) = self.both() {
            Aspect::entity_components_removed(&core, &entity, comps);
        }
    }

    fn on_cleared_components(&self) {
        if let Some((core, entity)) = self.both() {
            Aspect::entity_components_cleared(&core, &entity);
        }
    }

    fn on_sorted_components(&self) {
        if let Some((core, entity)) = self.both() {
            Aspect::entity_components_sorted(&core, &entity);
        }
    }
}

/// A filtered, continuously maintained view of an [`EntityCollection`].
///
/// Constructed attached. The constraint methods ([`Aspect::all`],
/// [`Aspect::exclude`], [`Aspect::one`] and their aliases) replace their
/// set and re-run the full match; they chain, so the usual shape is
///
/// ```ignore
/// let burning = Aspect::new(engine.entities())
///     .all([Kind::of::<Position>()])
///     .one([Kind::tag("flammable"), Kind::of::<Fuse>()]);
/// ```
///
/// After any event handler returns, [`Aspect::entities`] is exactly the
/// source filtered by the predicate, in source order.
pub struct Aspect {
    core: Rc<AspectCore>,
}

impl Aspect {
    /// Build an aspect over `source` with an empty constraint triple
    /// (which matches everything) and attach it.
    pub fn new(source: &EntityCollection) -> Aspect {
        let core = Rc::new(AspectCore {
            id: next_unit_id(),
            source: source.clone(),
            state: RefCell::new(AspectState::default()),
            dispatcher: Dispatcher::new(),
        });
        let aspect = Aspect { core };
        aspect.attach();
        aspect
    }

    /// This aspect's process-unique id; the key its listener slots live
    /// under.
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn source(&self) -> &EntityCollection {
        &self.core.source
    }

    pub fn is_attached(&self) -> bool {
        self.core.state.borrow().attached
    }

    /// The filtered entities, as a frozen snapshot consistent with the
    /// latest event.
    pub fn entities(&self) -> Snapshot<Entity> {
        self.core.state.borrow().frozen.clone()
    }

    /// Evaluate the predicate against `entity` as it is right now.
    pub fn matches(&self, entity: &Entity) -> bool {
        let state = self.core.state.borrow();
        constraint_match(&state.all, &state.exclude, &state.one, entity)
    }

    /// Require every one of `kinds`. Replaces the previous `all` set
    /// (deduplicated, first occurrence wins) and re-matches the source.
    pub fn all(self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.core.state.borrow_mut().all = dedup_kinds(kinds);
        Self::rematch(&self.core);
        self
    }

    /// Alias for [`Aspect::all`].
    pub fn every(self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.all(kinds)
    }

    /// Reject any of `kinds`. Replaces the previous `exclude` set and
    /// re-matches the source.
    pub fn exclude(self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.core.state.borrow_mut().exclude = dedup_kinds(kinds);
        Self::rematch(&self.core);
        self
    }

    /// Alias for [`Aspect::exclude`].
    pub fn without(self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.exclude(kinds)
    }

    /// Require at least one of `kinds` (when non-empty). Replaces the
    /// previous `one` set and re-matches the source.
    pub fn one(self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.core.state.borrow_mut().one = dedup_kinds(kinds);
        Self::rematch(&self.core);
        self
    }

    /// Alias for [`Aspect::one`].
    pub fn some(self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.one(kinds)
    }

    /// Apply a whole [`Constraints`] triple at once, with a single
    /// re-match.
    pub fn constrain(self, constraints: Constraints) -> Self {
        {
            let mut state = self.core.state.borrow_mut();
            state.all = dedup_kinds(constraints.all);
            state.exclude = dedup_kinds(constraints.exclude);
            state.one = dedup_kinds(constraints.one);
        }
        Self::rematch(&self.core);
        self
    }

    /// Wire the aspect to its source: source listener, a full re-match
    /// (installing per-entity listeners), then `on_attached`. Idempotent.
    pub fn attach(&self) {
        if self.core.state.borrow().attached {
            return;
        }
        self.core.state.borrow_mut().attached = true;
        let bridge: Rc<dyn CollectionListener<Entity>> = Rc::new(SourceBridge {
            aspect: Rc::downgrade(&self.core),
        });
        self.core
            .source
            .dispatcher()
            .add_keyed_listener(self.core.id, bridge, true);
        Self::rematch(&self.core);
        log::trace!("aspect {} attached", self.core.id);
        self.core.dispatcher.dispatch(|l| l.on_attached());
    }

    /// Unwire everything: the source listener and the per-entity listener
    /// on every entity currently in the source, then `on_detached`.
    /// Idempotent. The last filtered snapshot stays readable.
    pub fn detach(&self) {
        if !self.core.state.borrow().attached {
            return;
        }
        self.core.source.dispatcher().remove_keyed(self.core.id);
        for entity in self.core.source.elements().iter() {
            entity.dispatcher().remove_keyed(self.core.id);
        }
        self.core.state.borrow_mut().attached = false;
        log::trace!("aspect {} detached", self.core.id);
        self.core.dispatcher.dispatch(|l| l.on_detached());
    }

    pub fn add_listener(&self, listener: Rc<dyn AspectListener>, lock: bool) -> bool {
        self.core.dispatcher.add_listener(listener, lock)
    }

    pub fn remove_listener(
        &self,
        listener: &Rc<dyn AspectListener>,
    ) -> Result<bool, LockedListenerError> {
        self.core.dispatcher.remove_listener(listener)
    }

    pub fn dispatcher(&self) -> &Dispatcher<dyn AspectListener> {
        &self.core.dispatcher
    }

    /// Recompute the filtered set from scratch against the current source,
    /// installing per-entity listeners on every source entity. Emits no
    /// membership events; this is a reset, not a delta.
    fn rematch(core: &Rc<AspectCore>) {
        let source = core.source.elements();
        if core.state.borrow().attached {
            for entity in source.iter() {
                Self::install_entity_listener(core, entity);
            }
        }
        {
            let mut state = core.state.borrow_mut();
            let filtered: Vec<Entity> = source
                .iter()
                .filter(|e| constraint_match(&state.all, &state.exclude, &state.one, e))
                .cloned()
                .collect();
            state.filtered = filtered;
            state.frozen = Snapshot::from(state.filtered.as_slice());
        }
        log::trace!(
            "aspect {} rematched, {} of {} entities",
            core.id,
            core.state.borrow().filtered.len(),
            source.len()
        );
    }

    fn install_entity_listener(core: &Rc<AspectCore>, entity: &Entity) {
        if entity.dispatcher().has_keyed(core.id) {
            return;
        }
        let bridge: Rc<dyn EntityListener> = Rc::new(EntityBridge {
            aspect: Rc::downgrade(core),
            entity: entity.downgrade(),
        });
        entity.dispatcher().add_keyed_listener(core.id, bridge, true);
    }

    fn source_added(core: &Rc<AspectCore>, entities: &[Entity]) {
        let admitted: Vec<Entity> = {
            let mut state = core.state.borrow_mut();
            let mut admitted = Vec::new();
            for entity in entities {
                if constraint_match(&state.all, &state.exclude, &state.one, entity)
                    && !state.filtered.contains(entity)
                {
                    state.filtered.push(entity.clone());
                    admitted.push(entity.clone());
                }
            }
            if !admitted.is_empty() {
                state.frozen = Snapshot::from(state.filtered.as_slice());
            }
            admitted
        };
        // Listen to every incoming entity, matched or not, so a later
        // component change can admit it.
        for entity in entities {
            Self::install_entity_listener(core, entity);
        }
        if !admitted.is_empty() {
            core.dispatcher.dispatch(|l| l.on_added_entities(&admitted));
        }
    }

    fn source_removed(core: &Rc<AspectCore>, entities: &[Entity]) {
        let removed: Vec<Entity> = {
            let mut state = core.state.borrow_mut();
            let mut removed = Vec::new();
            for entity in entities {
                if let Some(at) = state.filtered.iter().position(|e| e == entity) {
                    removed.push(state.filtered.remove(at));
                }
            }
            if !removed.is_empty() {
                state.frozen = Snapshot::from(state.filtered.as_slice());
            }
            removed
        };
        for entity in entities {
            entity.dispatcher().remove_keyed(core.id);
        }
        if !removed.is_empty() {
            core.dispatcher.dispatch(|l| l.on_removed_entities(&removed));
        }
    }

    fn source_cleared(core: &Rc<AspectCore>) {
        // The source is already empty when this fires, so the filtered set
        // is the only record of who we were listening to.
        let orphans: Vec<Entity> = {
            let mut state = core.state.borrow_mut();
            let orphans = std::mem::take(&mut state.filtered);
            state.frozen = Snapshot::empty();
            orphans
        };
        for entity in &orphans {
            entity.dispatcher().remove_keyed(core.id);
        }
        core.dispatcher.dispatch(|l| l.on_cleared_entities());
    }

    fn source_sorted(core: &Rc<AspectCore>) {
        // Inherit the source's new ordering by re-filtering it. No
        // membership changed, so listeners stay as they are.
        let source = core.source.elements();
        {
            let mut state = core.state.borrow_mut();
            let filtered: Vec<Entity> = source
                .iter()
                .filter(|e| constraint_match(&state.all, &state.exclude, &state.one, e))
                .cloned()
                .collect();
            state.filtered = filtered;
            state.frozen = Snapshot::from(state.filtered.as_slice());
        }
        core.dispatcher.dispatch(|l| l.on_sorted_entities());
    }

    fn entity_components_added(core: &Rc<AspectCore>, entity: &Entity, comps: &[Comp]) {
        let admitted = {
            let mut state = core.state.borrow_mut();
            if constraint_match(&state.all, &state.exclude, &state.one, entity)
                && !state.filtered.contains(entity)
            {
                state.filtered.push(entity.clone());
                state.frozen = Snapshot::from(state.filtered.as_slice());
                true
            } else {
                false
            }
        };
        if admitted {
            core.dispatcher
                .dispatch(|l| l.on_added_entities(std::slice::from_ref(entity)));
        }
        core.dispatcher
            .dispatch(|l| l.on_added_components(entity, comps));
    }

    fn entity_components_removed(core: &Rc<AspectCore>, entity: &Entity, comps: &[Comp]) {
        let evicted = {
            let mut state = core.state.borrow_mut();
            let still_matches = constraint_match(&state.all, &state.exclude, &state.one, entity);
            match state.filtered.iter().position(|e| e == entity) {
                Some(at) if !still_matches => {
                    state.filtered.remove(at);
                    state.frozen = Snapshot::from(state.filtered.as_slice());
                    true
                }
                _ => false,
            }
        };
        if evicted {
            core.dispatcher
                .dispatch(|l| l.on_removed_entities(std::slice::from_ref(entity)));
        }
        core.dispatcher
            .dispatch(|l| l.on_removed_components(entity, comps));
    }

    fn entity_components_cleared(core: &Rc<AspectCore>, entity: &Entity) {
        let evicted = {
            let mut state = core.state.borrow_mut();
            match state.filtered.iter().position(|e| e == entity) {
                Some(at) => {
                    state.filtered.remove(at);
                    state.frozen = Snapshot::from(state.filtered.as_slice());
                    true
                }
                None => false,
            }
        };
        if evicted {
            core.dispatcher
                .dispatch(|l| l.on_removed_entities(std::slice::from_ref(entity)));
            core.dispatcher.dispatch(|l| l.on_cleared_components(entity));
        }
    }

    fn entity_components_sorted(core: &Rc<AspectCore>, entity: &Entity) {
        let filtered = core.state.borrow().filtered.contains(entity);
        if filtered {
            core.dispatcher.dispatch(|l| l.on_sorted_components(entity));
        }
    }
}

impl Clone for Aspect {
    fn clone(&self) -> Self {
        Aspect {
            core: self.core.clone(),
        }
    }
}

impl PartialEq for Aspect {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl fmt::Debug for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.borrow();
        f.debug_struct("Aspect")
            .field("id", &self.core.id)
            .field("attached", &state.attached)
            .field("filtered", &state.filtered.len())
            .finish()
    }
}

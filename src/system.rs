//! Systems: prioritized processors driven by an [`Engine`](crate::engine::Engine).
//!
//! A [`System`] is the stateful handle the engine schedules: priority,
//! active flag, updating flag, engine back-reference, listeners. The
//! behavior lives in a user-implemented [`Processor`]. Synchronous systems
//! implement [`Processor::process`]; asynchronous ones override
//! [`Processor::process_async`] instead (the default defers to the sync
//! path when first polled).
//!
//! Errors from processing never escape [`System::run`]; they are captured
//! and delivered to [`SystemListener::on_error`], and from there the owning
//! engine forwards them to its own listeners.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use futures::future::LocalBoxFuture;

use crate::aspect::{Aspect, AspectListener, Constraints};
use crate::collection::Snapshot;
use crate::component::Comp;
use crate::dispatch::{Dispatcher, LockedListenerError};
use crate::engine::Engine;
use crate::entities::Entity;

/// The opaque payload handed to [`Engine::run`](crate::engine::Engine::run)
/// and forwarded untouched to every system.
pub type RunOptions = dyn Any;

/// How a single system executes within a run.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum SystemMode {
    /// Call [`Processor::process`] synchronously.
    #[default]
    Sync,
    /// Await [`Processor::process_async`], bracketed by the updating flag.
    Async,
}

/// System lifecycle events. All handlers default to nothing.
pub trait SystemListener {
    fn on_activated(&self) {}

    fn on_deactivated(&self) {}

    fn on_added_to_engine(&self, engine: &Engine) {
        let _ = engine;
    }

    fn on_removed_from_engine(&self, engine: &Engine) {
        let _ = engine;
    }

    fn on_error(&self, error: &eyre::Report) {
        let _ = error;
    }
}

/// A system's behavior. Implement [`Processor::process`] (or
/// [`Processor::process_async`] for suspending work) and whichever
/// lifecycle hooks you care about; the hooks run before the matching
/// listener event is dispatched.
pub trait Processor: 'static {
    fn process(&self, system: &System, options: &RunOptions) -> eyre::Result<()> {
        let _ = (system, options);
        Ok(())
    }

    fn process_async<'a>(
        &'a self,
        system: &'a System,
        options: &'a RunOptions,
    ) -> LocalBoxFuture<'a, eyre::Result<()>> {
        Box::pin(async move { self.process(system, options) })
    }

    fn activated(&self, system: &System) {
        let _ = system;
    }

    fn deactivated(&self, system: &System) {
        let _ = system;
    }

    fn added_to_engine(&self, system: &System, engine: &Engine) {
        let _ = (system, engine);
    }

    fn removed_from_engine(&self, system: &System, engine: &Engine) {
        let _ = (system, engine);
    }
}

struct SystemCore {
    priority: Cell<i64>,
    active: Cell<bool>,
    updating: Cell<bool>,
    engine: RefCell<Option<crate::engine::WeakEngine>>,
    processor: Rc<dyn Processor>,
    dispatcher: Dispatcher<dyn SystemListener>,
}

/// A schedulable processor. Cheap-clone handle; equality is reference
/// identity. Lower priority runs earlier.
pub struct System {
    core: Rc<SystemCore>,
}

impl System {
    pub fn new(priority: i64, processor: impl Processor) -> System {
        System {
            core: Rc::new(SystemCore {
                priority: Cell::new(priority),
                active: Cell::new(true),
                updating: Cell::new(false),
                engine: RefCell::new(None),
                processor: Rc::new(processor),
                dispatcher: Dispatcher::new(),
            }),
        }
    }

    pub fn priority(&self) -> i64 {
        self.core.priority.get()
    }

    /// Reassign the priority. The engine only re-sorts on system addition,
    /// so a live reprioritization takes effect on the next membership
    /// change (or an explicit sort of the engine's system collection).
    pub fn set_priority(&self, priority: i64) {
        self.core.priority.set(priority);
    }

    pub fn is_active(&self) -> bool {
        self.core.active.get()
    }

    /// Flip the active flag. Writing the current value is a no-op: no hook,
    /// no event. A real change runs the processor hook, then dispatches
    /// `on_activated` / `on_deactivated`.
    pub fn set_active(&self, active: bool) {
        if self.core.active.get() == active {
            return;
        }
        self.core.active.set(active);
        if active {
            self.core.processor.activated(self);
            self.core.dispatcher.dispatch(|l| l.on_activated());
        } else {
            self.core.processor.deactivated(self);
            self.core.dispatcher.dispatch(|l| l.on_deactivated());
        }
    }

    /// Whether an async run is currently in flight.
    pub fn is_updating(&self) -> bool {
        self.core.updating.get()
    }

    pub fn engine(&self) -> Option<Engine> {
        self.core.engine.borrow().as_ref().and_then(|w| w.upgrade())
    }

    /// Rebind the engine back-reference. Normally the engine calls this
    /// when the system joins or leaves it. Writing the current engine is a
    /// no-op. A real change runs `removed_from_engine(old)` (hook, then
    /// event) followed by `added_to_engine(new)`.
    pub fn set_engine(&self, engine: Option<&Engine>) {
        let current = self.engine();
        match (current.as_ref(), engine) {
            (None, None) => return,
            (Some(old), Some(new)) if old == new => return,
            _ => {}
        }
        *self.core.engine.borrow_mut() = engine.map(Engine::downgrade);
        if let Some(old) = current {
            self.core.processor.removed_from_engine(self, &old);
            self.core
                .dispatcher
                .dispatch(|l| l.on_removed_from_engine(&old));
        }
        if let Some(new) = engine {
            self.core.processor.added_to_engine(self, new);
            self.core.dispatcher.dispatch(|l| l.on_added_to_engine(new));
        }
    }

    /// Process synchronously. An error is captured and dispatched as
    /// `on_error`; it does not propagate.
    pub fn run_sync(&self, options: &RunOptions) {
        if let Err(error) = self.core.processor.process(self, options) {
            self.core.dispatcher.dispatch(|l| l.on_error(&error));
        }
    }

    /// Process asynchronously: raise the updating flag, await the
    /// processor, capture any error as `on_error`, lower the flag.
    pub async fn run_async(&self, options: &RunOptions) {
        self.core.updating.set(true);
        let result = self.core.processor.process_async(self, options).await;
        if let Err(error) = result {
            self.core.dispatcher.dispatch(|l| l.on_error(&error));
        }
        self.core.updating.set(false);
    }

    pub async fn run(&self, options: &RunOptions, mode: SystemMode) {
        match mode {
            SystemMode::Sync => self.run_sync(options),
            SystemMode::Async => self.run_async(options).await,
        }
    }

    pub fn add_listener(&self, listener: Rc<dyn SystemListener>, lock: bool) -> bool {
        self.core.dispatcher.add_listener(listener, lock)
    }

    pub fn remove_listener(
        &self,
        listener: &Rc<dyn SystemListener>,
    ) -> Result<bool, LockedListenerError> {
        self.core.dispatcher.remove_listener(listener)
    }

    pub fn dispatcher(&self) -> &Dispatcher<dyn SystemListener> {
        &self.core.dispatcher
    }

    pub(crate) fn downgrade(&self) -> WeakSystem {
        WeakSystem(Rc::downgrade(&self.core))
    }
}

impl Clone for System {
    fn clone(&self) -> Self {
        System {
            core: self.core.clone(),
        }
    }
}

impl PartialEq for System {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("priority", &self.core.priority.get())
            .field("active", &self.core.active.get())
            .field("updating", &self.core.updating.get())
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakSystem(Weak<SystemCore>);

impl WeakSystem {
    pub fn upgrade(&self) -> Option<System> {
        self.0.upgrade().map(|core| System { core })
    }
}

/// Per-entity behavior for an [`EntityProcessingSystem`]. Only
/// [`EntityProcessor::process_entity`] is required; the remaining hooks
/// mirror [`AspectListener`] and default to nothing.
pub trait EntityProcessor: 'static {
    fn process_entity(
        &self,
        entity: &Entity,
        index: usize,
        entities: &[Entity],
        options: &RunOptions,
    ) -> eyre::Result<()>;

    fn entities_added(&self, entities: &[Entity]) {
        let _ = entities;
    }

    fn entities_removed(&self, entities: &[Entity]) {
        let _ = entities;
    }

    fn entities_cleared(&self) {}

    fn entities_sorted(&self) {}

    fn components_added(&self, entity: &Entity, comps: &[Comp]) {
        let _ = (entity, comps);
    }

    fn components_removed(&self, entity: &Entity, comps: &[Comp]) {
        let _ = (entity, comps);
    }

    fn components_cleared(&self, entity: &Entity) {
        let _ = entity;
    }

    fn components_sorted(&self, entity: &Entity) {
        let _ = entity;
    }
}

struct EpsShared<P> {
    processor: P,
    constraints: Option<Constraints>,
    aspect: RefCell<Option<Aspect>>,
}

/// Forwards aspect events to the [`EntityProcessor`] hooks.
struct EpsBridge<P> {
    shared: Weak<EpsShared<P>>,
}

impl<P: EntityProcessor> AspectListener for EpsBridge<P> {
    fn on_added_entities(&self, entities: &[Entity]) {
        if let Some(shared) = self.shared.upgrade() {
            shared.processor.entities_added(entities);
        }
    }

    fn on_removed_entities(&self, entities: &[Entity]) {
        if let Some(shared) = self.shared.upgrade() {
            shared.processor.entities_removed(entities);
        }
    }

    fn on_cleared_entities(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.processor.entities_cleared();
        }
    }

    fn on_sorted_entities(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.processor.entities_sorted();
        }
    }

    fn on_added_components(&self, entity: &Entity, comps: &[Comp]) {
        if let Some(shared) = self.shared.upgrade() {
            shared.processor.components_added(entity, comps);
        }
    }

    fn on_removed_components(&self, entity: &Entity, comps: &[Comp]) {
        if let Some(shared) = self.shared.upgrade() {
            shared.processor.components_removed(entity, comps);
        }
    }

    fn on_cleared_components(&self, entity: &Entity) {
        if let Some(shared) = self.shared.upgrade() {
            shared.processor.components_cleared(entity);
        }
    }

    fn on_sorted_components(&self, entity: &Entity) {
        if let Some(shared) = self.shared.upgrade() {
            shared.processor.components_sorted(entity);
        }
    }
}

/// A [`Processor`] that visits entities one at a time.
///
/// Given constraints, it builds an [`Aspect`] over the engine's entities
/// when the system joins an engine (detaching it again on removal) and
/// visits the matched set each run. Without constraints it visits every
/// entity in the engine.
pub struct EntityProcessingSystem<P: EntityProcessor> {
    shared: Rc<EpsShared<P>>,
}

impl<P: EntityProcessor> EntityProcessingSystem<P> {
    /// Visit every entity in the engine.
    pub fn new(processor: P) -> Self {
        Self {
            shared: Rc::new(EpsShared {
                processor,
                constraints: None,
                aspect: RefCell::new(None),
            }),
        }
    }

    /// Visit only entities matching `constraints`.
    pub fn with_constraints(processor: P, constraints: Constraints) -> Self {
        Self {
            shared: Rc::new(EpsShared {
                processor,
                constraints: Some(constraints),
                aspect: RefCell::new(None),
            }),
        }
    }

    /// The live aspect, while the system is in an engine and was built with
    /// constraints.
    pub fn aspect(&self) -> Option<Aspect> {
        self.shared.aspect.borrow().clone()
    }
}

impl<P: EntityProcessor> Clone for EntityProcessingSystem<P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P: EntityProcessor> Processor for EntityProcessingSystem<P> {
    fn process(&self, system: &System, options: &RunOptions) -> eyre::Result<()> {
        let entities: Snapshot<Entity> = match &*self.shared.aspect.borrow() {
            Some(aspect) => aspect.entities(),
            None => match system.engine() {
                Some(engine) => engine.entities().elements(),
                None => Snapshot::empty(),
            },
        };
        for (index, entity) in entities.iter().enumerate() {
            self.shared
                .processor
                .process_entity(entity, index, &entities, options)?;
        }
        Ok(())
    }

    fn added_to_engine(&self, _system: &System, engine: &Engine) {
        let Some(constraints) = self.shared.constraints.clone() else {
            return;
        };
        let aspect = Aspect::new(engine.entities()).constrain(constraints);
        aspect.add_listener(
            Rc::new(EpsBridge {
                shared: Rc::downgrade(&self.shared),
            }),
            false,
        );
        *self.shared.aspect.borrow_mut() = Some(aspect);
    }

    fn removed_from_engine(&self, _system: &System, _engine: &Engine) {
        if let Some(aspect) = self.shared.aspect.borrow_mut().take() {
            aspect.detach();
        }
    }
}

//! The orchestrator: owns systems and entities, runs systems by priority.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use futures::future::join_all;

use crate::collection::{Collection, CollectionListener, Snapshot};
use crate::dispatch::{Dispatcher, LockedListenerError};
use crate::entities::{Entity, EntityCollection, EntityId};
use crate::next_unit_id;
use crate::system::{Processor, RunOptions, System, SystemListener};

/// How [`Engine::run`] drives the active systems.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum EngineMode {
    /// Synchronous iteration in priority order. Never awaits; an async
    /// system's suspending work is not driven under this mode.
    #[default]
    Default,
    /// Await each system to completion before starting the next. Start and
    /// completion both follow priority order.
    Successive,
    /// Start every system in priority order, then await them all. Only
    /// start order is guaranteed.
    Parallel,
}

/// Engine-level events. All handlers default to nothing.
pub trait EngineListener {
    fn on_added_systems(&self, systems: &[System]) {
        let _ = systems;
    }

    fn on_removed_systems(&self, systems: &[System]) {
        let _ = systems;
    }

    fn on_cleared_systems(&self) {}

    /// A system's `process` failed. The error was already delivered to the
    /// system's own listeners; this is the engine-level echo.
    fn on_error_by_system(&self, error: &eyre::Report, system: &System) {
        let _ = (error, system);
    }

    fn on_added_entities(&self, entities: &[Entity]) {
        let _ = entities;
    }

    fn on_removed_entities(&self, entities: &[Entity]) {
        let _ = entities;
    }

    fn on_cleared_entities(&self) {}
}

pub(crate) struct EngineCore {
    id: u64,
    systems: Collection<System>,
    entities: EntityCollection,
    active: RefCell<Snapshot<System>>,
    dispatcher: Dispatcher<dyn EngineListener>,
}

/// Watches the system collection: keeps it priority-sorted, wires engine
/// back-references and per-system listeners, recomputes the active set.
struct SystemsBridge {
    engine: Weak<EngineCore>,
}

impl CollectionListener<System> for SystemsBridge {
    fn on_added(&self, systems: &[System]) {
        let Some(core) = self.engine.upgrade() else {
            return;
        };
        let engine = Engine { core };
        // Stable sort: equal priorities keep their insertion order.
        engine
            .core
            .systems
            .sort_by(|a, b| a.priority().cmp(&b.priority()));
        for system in systems {
            system.set_engine(Some(&engine));
        }
        Engine::refresh_active(&engine.core);
        for system in systems {
            let bridge: Rc<dyn SystemListener> = Rc::new(SystemBridge {
                engine: Rc::downgrade(&engine.core),
                system: system.downgrade(),
            });
            system
                .dispatcher()
                .add_keyed_listener(engine.core.id, bridge, true);
        }
        log::debug!(
            "engine {}: added {} system(s), {} total",
            engine.core.id,
            systems.len(),
            engine.core.systems.len()
        );
        engine
            .core
            .dispatcher
            .dispatch(|l| l.on_added_systems(systems));
    }

    fn on_removed(&self, systems: &[System]) {
        let Some(core) = self.engine.upgrade() else {
            return;
        };
        for system in systems {
            system.set_engine(None);
            system.dispatcher().remove_keyed(core.id);
        }
        Engine::refresh_active(&core);
        log::debug!(
            "engine {}: removed {} system(s), {} left",
            core.id,
            systems.len(),
            core.systems.len()
        );
        core.dispatcher.dispatch(|l| l.on_removed_systems(systems));
    }

    fn on_cleared(&self) {
        let Some(core) = self.engine.upgrade() else {
            return;
        };
        Engine::refresh_active(&core);
        core.dispatcher.dispatch(|l| l.on_cleared_systems());
    }

    fn on_sorted(&self) {
        if let Some(core) = self.engine.upgrade() {
            Engine::refresh_active(&core);
        }
    }
}

/// The engine's keyed listener on each of its systems: activation changes
/// refresh the active set, errors are echoed engine-level.
struct SystemBridge {
    engine: Weak<EngineCore>,
    system: crate::system::WeakSystem,
}

impl SystemListener for SystemBridge {
    fn on_activated(&self) {
        if let Some(core) = self.engine.upgrade() {
            Engine::refresh_active(&core);
        }
    }

    fn on_deactivated(&self) {
        if let Some(core) = self.engine.upgrade() {
            Engine::refresh_active(&core);
        }
    }

    fn on_error(&self, error: &eyre::Report) {
        if let (Some(core), Some(system)) = (self.engine.upgrade(), self.system.upgrade()) {
            core.dispatcher
                .dispatch(|l| l.on_error_by_system(error, &system));
        }
    }
}

/// Re-emits entity membership events at engine level.
struct EntitiesBridge {
    engine: Weak<EngineCore>,
}

impl CollectionListener<Entity> for EntitiesBridge {
    fn on_added(&self, entities: &[Entity]) {
        if let Some(core) = self.engine.upgrade() {
            core.dispatcher.dispatch(|l| l.on_added_entities(entities));
        }
    }

    fn on_removed(&self, entities: &[Entity]) {
        if let Some(core) = self.engine.upgrade() {
            core.dispatcher
                .dispatch(|l| l.on_removed_entities(entities));
        }
    }

    fn on_cleared(&self) {
        if let Some(core) = self.engine.upgrade() {
            core.dispatcher.dispatch(|l| l.on_cleared_entities());
        }
    }
}

/// Aggregates systems and entities and runs the systems in one of three
/// modes. Cheap-clone handle; equality is reference identity.
///
/// Systems join and leave through the observable [`Engine::systems`]
/// collection; the engine's own locked listener handles sorting, engine
/// back-references and error wiring. Multiple engines coexist freely in a
/// process.
pub struct Engine {
    core: Rc<EngineCore>,
}

impl Engine {
    pub fn new() -> Engine {
        let core = Rc::new(EngineCore {
            id: next_unit_id(),
            systems: Collection::new(),
            entities: EntityCollection::new(),
            active: RefCell::new(Snapshot::empty()),
            dispatcher: Dispatcher::new(),
        });
        core.systems.add_listener(
            Rc::new(SystemsBridge {
                engine: Rc::downgrade(&core),
            }),
            true,
        );
        core.entities.add_listener(
            Rc::new(EntitiesBridge {
                engine: Rc::downgrade(&core),
            }),
            true,
        );
        Engine { core }
    }

    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// The system collection. Adding and removing here is the canonical way
    /// to manage systems.
    pub fn systems(&self) -> &Collection<System> {
        &self.core.systems
    }

    /// The canonical entity source; aspects are usually built over this.
    pub fn entities(&self) -> &EntityCollection {
        &self.core.entities
    }

    /// The active systems in priority order, frozen at the last membership,
    /// ordering, or activation change.
    pub fn active_systems(&self) -> Snapshot<System> {
        self.core.active.borrow().clone()
    }

    /// Convenience: build a [`System`] around `processor` and add it.
    pub fn add_system(&self, priority: i64, processor: impl Processor) -> System {
        let system = System::new(priority, processor);
        self.core.systems.add(system.clone());
        system
    }

    /// Convenience: build an [`Entity`] and add it.
    pub fn add_entity(&self, id: impl Into<EntityId>) -> Entity {
        let entity = Entity::new(id);
        self.core.entities.add(entity.clone());
        entity
    }

    /// Run every active system synchronously, in priority order. Equivalent
    /// to [`Engine::run`] with [`EngineMode::Default`], minus the async
    /// plumbing.
    pub fn run_default(&self, options: &RunOptions) {
        let systems = self.active_systems();
        for system in systems.iter() {
            system.run_sync(options);
        }
    }

    /// Run every active system under `mode`. System errors never escape;
    /// they surface through [`EngineListener::on_error_by_system`].
    pub async fn run(&self, options: &RunOptions, mode: EngineMode) {
        match mode {
            EngineMode::Default => self.run_default(options),
            EngineMode::Successive => {
                let systems = self.active_systems();
                for system in systems.iter() {
                    system.run_async(options).await;
                }
            }
            EngineMode::Parallel => {
                let systems = self.active_systems();
                let runs: Vec<_> = systems.iter().map(|s| s.run_async(options)).collect();
                join_all(runs).await;
            }
        }
    }

    pub fn add_listener(&self, listener: Rc<dyn EngineListener>, lock: bool) -> bool {
        self.core.dispatcher.add_listener(listener, lock)
    }

    pub fn remove_listener(
        &self,
        listener: &Rc<dyn EngineListener>,
    ) -> Result<bool, LockedListenerError> {
        self.core.dispatcher.remove_listener(listener)
    }

    pub fn dispatcher(&self) -> &Dispatcher<dyn EngineListener> {
        &self.core.dispatcher
    }

    pub(crate) fn downgrade(&self) -> WeakEngine {
        WeakEngine(Rc::downgrade(&self.core))
    }

    fn refresh_active(core: &EngineCore) {
        let active: Vec<System> = core
            .systems
            .elements()
            .iter()
            .filter(|s| s.is_active())
            .cloned()
            .collect();
        *core.active.borrow_mut() = Snapshot::from(active);
    }
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Engine {
            core: self.core.clone(),
        }
    }
}

impl PartialEq for Engine {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.core.id)
            .field("systems", &self.core.systems.len())
            .field("entities", &self.core.entities.len())
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakEngine(Weak<EngineCore>);

impl WeakEngine {
    pub fn upgrade(&self) -> Option<Engine> {
        self.0.upgrade().map(|core| Engine { core })
    }
}

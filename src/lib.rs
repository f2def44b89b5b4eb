#![doc = include_str!("../README.md")]

pub mod aspect;
pub mod collection;
pub mod component;
pub mod dispatch;
pub mod engine;
pub mod entities;
pub mod system;

use std::any::{self, TypeId};
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a concrete component type, with the type name dragged along
/// so debug output is legible.
#[derive(Clone, Copy)]
pub(crate) struct ClassId {
    tid: TypeId,
    type_name: &'static str,
}

impl ClassId {
    pub fn of<T: 'static>() -> Self {
        Self {
            tid: TypeId::of::<T>(),
            type_name: any::type_name::<T>(),
        }
    }
}

impl PartialEq for ClassId {
    fn eq(&self, other: &Self) -> bool {
        self.tid == other.tid
    }
}

impl Eq for ClassId {}

impl Hash for ClassId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tid.hash(state);
    }
}

impl Debug for ClassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ClassId").field(&self.type_name).finish()
    }
}

/// Aspects and engines each get a process-unique id from this counter, so
/// the listener slots they claim on other objects never collide.
static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_unit_id() -> u64 {
    NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed)
}

pub mod prelude {
    pub use crate::aspect::{Aspect, AspectListener, Constraints};
    pub use crate::collection::{Collection, CollectionListener, Snapshot};
    pub use crate::component::{Comp, Component, ComponentContainer, Kind};
    pub use crate::dispatch::{Dispatcher, LockedListenerError};
    pub use crate::engine::{Engine, EngineListener, EngineMode};
    pub use crate::entities::{Entity, EntityCollection, EntityId, EntityListener};
    pub use crate::system::{
        EntityProcessingSystem, EntityProcessor, Processor, RunOptions, System, SystemListener,
        SystemMode,
    };
}

//! Entity identity, event re-emission, and the id-indexed collection.

use std::cell::RefCell;
use std::rc::Rc;

use aspecs::prelude::*;

struct Tag(&'static str);
impl Component for Tag {}

#[derive(Default)]
struct Recorder {
    events: RefCell<Vec<String>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

impl EntityListener for Recorder {
    fn on_added_components(&self, comps: &[Comp]) {
        self.events
            .borrow_mut()
            .push(format!("added x{}", comps.len()));
    }

    fn on_removed_components(&self, comps: &[Comp]) {
        self.events
            .borrow_mut()
            .push(format!("removed x{}", comps.len()));
    }

    fn on_cleared_components(&self) {
        self.events.borrow_mut().push("cleared".to_string());
    }

    fn on_sorted_components(&self) {
        self.events.borrow_mut().push("sorted".to_string());
    }
}

#[test]
fn container_events_reemit_at_entity_level() {
    let entity = Entity::new("hero");
    let recorder = Rc::new(Recorder::default());
    entity.add_listener(recorder.clone(), false);

    let sword = Comp::new(Tag("sword"));
    entity.components().add_all([sword.clone(), Comp::new(Tag("shield"))]);
    entity.components().remove(&sword);
    entity
        .components()
        .sort_by(|a, b| format!("{:?}", a.kind()).cmp(&format!("{:?}", b.kind())));
    entity.components().clear();

    assert_eq!(
        recorder.take(),
        vec!["added x2", "removed x1", "sorted", "cleared"]
    );
}

#[test]
fn entity_equality_is_identity_not_id() {
    let a = Entity::new(1);
    let b = Entity::new(1);
    assert_ne!(a, b);
    assert_eq!(a, a.clone());
    assert_eq!(a.id(), b.id());
}

#[test]
fn entity_ids_come_in_numbers_and_names() {
    assert_eq!(EntityId::from(3).to_string(), "3");
    assert_eq!(EntityId::from("boss").to_string(), "boss");
    assert_eq!(EntityId::from("boss"), EntityId::from(String::from("boss")));
}

#[test]
fn the_collection_indexes_by_id() {
    let collection = EntityCollection::new();
    let hero = Entity::new("hero");
    let boss = Entity::new(9);
    collection.add_all([hero.clone(), boss.clone()]);

    assert_eq!(collection.get("hero"), Some(hero.clone()));
    assert_eq!(collection.get(9), Some(boss.clone()));
    assert_eq!(collection.get("nobody"), None);

    collection.remove(&boss);
    assert_eq!(collection.get(9), None);

    collection.clear();
    assert_eq!(collection.get("hero"), None);
    assert!(collection.is_empty());
}

#[test]
fn contested_ids_resolve_to_the_last_added() {
    let collection = EntityCollection::new();
    let first = Entity::new(1);
    let second = Entity::new(1);
    collection.add_all([first.clone(), second.clone()]);

    // Both are members; only the lookup slot is contested.
    assert_eq!(collection.len(), 2);
    assert_eq!(collection.get(1), Some(second.clone()));

    // Removing the loser does not disturb the winner's slot.
    collection.remove(&first);
    assert_eq!(collection.get(1), Some(second));
}

#[test]
fn the_reemit_wiring_is_locked() {
    let entity = Entity::new(1);
    // Slot 0 on the container is the type index, slot 1 the re-emitter;
    // neither is removable.
    assert!(entity.components().remove_listener_at(0).is_err());
    assert!(entity.components().remove_listener_at(1).is_err());
}

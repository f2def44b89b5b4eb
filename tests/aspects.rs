//! The live filtered view: admission, eviction, wiring accounting, and
//! event fan-out.

use std::cell::RefCell;
use std::rc::Rc;

use aspecs::prelude::*;

struct Pos;
impl Component for Pos {}

struct Vel;
impl Component for Vel {}

struct Burning;
impl Component for Burning {
    fn type_tag() -> Option<&'static str>
    where
        Self: Sized,
    {
        Some("status")
    }
}

struct Wet;
impl Component for Wet {
    fn type_tag() -> Option<&'static str>
    where
        Self: Sized,
    {
        Some("status")
    }
}

fn ids(entities: &[Entity]) -> String {
    entities
        .iter()
        .map(|e| e.id().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn num(entity: &Entity) -> i64 {
    match entity.id() {
        EntityId::Num(n) => *n,
        EntityId::Name(_) => i64::MAX,
    }
}

#[derive(Default)]
struct Recorder {
    events: RefCell<Vec<String>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    fn push(&self, event: String) {
        self.events.borrow_mut().push(event);
    }
}

impl AspectListener for Recorder {
    fn on_attached(&self) {
        self.push("attached".to_string());
    }

    fn on_detached(&self) {
        self.push("detached".to_string());
    }

    fn on_added_entities(&self, entities: &[Entity]) {
        self.push(format!("+e {}", ids(entities)));
    }

    fn on_removed_entities(&self, entities: &[Entity]) {
        self.push(format!("-e {}", ids(entities)));
    }

    fn on_cleared_entities(&self) {
        self.push("cleared-e".to_string());
    }

    fn on_sorted_entities(&self) {
        self.push("sorted-e".to_string());
    }

    fn on_added_components(&self, entity: &Entity, comps: &[Comp]) {
        self.push(format!("+c {} x{}", entity.id(), comps.len()));
    }

    fn on_removed_components(&self, entity: &Entity, comps: &[Comp]) {
        self.push(format!("-c {} x{}", entity.id(), comps.len()));
    }

    fn on_cleared_components(&self, entity: &Entity) {
        self.push(format!("clr-c {}", entity.id()));
    }

    fn on_sorted_components(&self, entity: &Entity) {
        self.push(format!("srt-c {}", entity.id()));
    }
}

fn watched(aspect: &Aspect) -> Rc<Recorder> {
    let recorder = Rc::new(Recorder::default());
    aspect.add_listener(recorder.clone(), false);
    recorder
}

#[test]
fn admission_on_component_add() {
    let source = EntityCollection::new();
    let aspect = Aspect::new(&source).all([Kind::of::<Pos>()]);
    let recorder = watched(&aspect);

    let e = Entity::new("x");
    source.add(e.clone());
    assert!(aspect.entities().is_empty());
    assert!(recorder.take().is_empty());

    e.components().add(Comp::new(Pos));
    assert_eq!(aspect.entities(), vec![e.clone()]);
    assert_eq!(recorder.take(), vec!["+e x", "+c x x1"]);
}

#[test]
fn eviction_on_component_clear() {
    let source = EntityCollection::new();
    let aspect = Aspect::new(&source).all([Kind::of::<Pos>()]);
    let e = Entity::new("x");
    source.add(e.clone());
    e.components().add(Comp::new(Pos));
    let recorder = watched(&aspect);

    e.components().clear();
    assert!(aspect.entities().is_empty());
    assert_eq!(recorder.take(), vec!["-e x", "clr-c x"]);
}

#[test]
fn an_empty_triple_matches_everything() {
    let source = EntityCollection::new();
    let aspect = Aspect::new(&source);

    let bare = Entity::new(1);
    let laden = Entity::new(2);
    laden.components().add(Comp::new(Pos));
    source.add_all([bare.clone(), laden.clone()]);

    assert_eq!(aspect.entities(), vec![bare, laden]);
}

#[test]
fn exclude_and_one_sets() {
    let source = EntityCollection::new();
    let a = Entity::new(1);
    a.components().add_all([Comp::new(Pos), Comp::new(Vel)]);
    let b = Entity::new(2);
    b.components().add(Comp::new(Pos));
    let c = Entity::new(3);
    c.components().add_all([Comp::new(Pos), Comp::new(Burning)]);
    source.add_all([a.clone(), b.clone(), c.clone()]);

    let movers = Aspect::new(&source)
        .all([Kind::of::<Pos>()])
        .one([Kind::of::<Vel>(), Kind::tag("status")]);
    assert_eq!(movers.entities(), vec![a.clone(), c.clone()]);

    let calm = Aspect::new(&source)
        .all([Kind::of::<Pos>()])
        .exclude([Kind::tag("status")]);
    assert_eq!(calm.entities(), vec![a.clone(), b.clone()]);
}

#[test]
fn class_constraints_honor_colliding_tags() {
    let source = EntityCollection::new();
    let e = Entity::new("x");
    e.components().add_all([Comp::new(Pos), Comp::new(Wet)]);
    source.add(e.clone());

    // Wet shares Burning's tag, so a constraint on the Burning class is
    // satisfied by Wet...
    let one = Aspect::new(&source)
        .all([Kind::of::<Pos>()])
        .one([Kind::of::<Burning>()]);
    assert_eq!(one.entities(), vec![e.clone()]);

    // ...and an exclusion on the Burning class rejects it for the same
    // reason.
    let excl = Aspect::new(&source)
        .all([Kind::of::<Pos>()])
        .exclude([Kind::of::<Burning>()]);
    assert!(excl.entities().is_empty());
}

#[test]
fn constraint_aliases() {
    let source = EntityCollection::new();
    let e = Entity::new(1);
    e.components().add(Comp::new(Pos));
    source.add(e.clone());

    let aspect = Aspect::new(&source)
        .every([Kind::of::<Pos>()])
        .without([Kind::of::<Vel>()])
        .some([Kind::of::<Pos>()]);
    assert_eq!(aspect.entities(), vec![e]);
}

#[test]
fn source_removal_unwires_and_reports() {
    let source = EntityCollection::new();
    let aspect = Aspect::new(&source);
    let e = Entity::new(1);
    source.add(e.clone());
    let recorder = watched(&aspect);

    source.remove(&e);
    assert!(aspect.entities().is_empty());
    assert!(!e.dispatcher().has_keyed(aspect.id()));
    assert_eq!(recorder.take(), vec!["-e 1"]);

    // Gone means silent: further component churn is not observed.
    e.components().add(Comp::new(Pos));
    assert!(recorder.take().is_empty());
}

#[test]
fn source_clear_unwires_the_filtered() {
    let source = EntityCollection::new();
    let aspect = Aspect::new(&source).all([Kind::of::<Pos>()]);
    let inside = Entity::new(1);
    inside.components().add(Comp::new(Pos));
    source.add(inside.clone());
    let recorder = watched(&aspect);

    source.clear();
    assert!(aspect.entities().is_empty());
    assert!(!inside.dispatcher().has_keyed(aspect.id()));
    assert_eq!(recorder.take(), vec!["cleared-e"]);
}

#[test]
fn source_sort_order_is_inherited() {
    let source = EntityCollection::new();
    let aspect = Aspect::new(&source);
    source.add_all([Entity::new(3), Entity::new(1), Entity::new(2)]);
    let recorder = watched(&aspect);

    source.sort_by(|a, b| num(a).cmp(&num(b)));
    let order: Vec<i64> = aspect.entities().iter().map(num).collect();
    assert_eq!(order, vec![1, 2, 3]);
    assert_eq!(recorder.take(), vec!["sorted-e"]);
}

#[test]
fn component_events_reemit_even_without_membership_change() {
    let source = EntityCollection::new();
    let aspect = Aspect::new(&source).all([Kind::of::<Pos>()]);
    let e = Entity::new("x");
    e.components().add(Comp::new(Pos));
    source.add(e.clone());
    let recorder = watched(&aspect);

    // Already matched; adding something irrelevant changes nothing about
    // membership but is still reported.
    e.components().add(Comp::new(Vel));
    assert_eq!(recorder.take(), vec!["+c x x1"]);

    // Still matches after the removal: membership silent, churn reported.
    let vel = e.components().get::<Vel>().unwrap();
    e.components().remove(&vel);
    assert_eq!(recorder.take(), vec!["-c x x1"]);
}

#[test]
fn one_keyed_listener_per_aspect_per_entity() {
    let source = EntityCollection::new();
    let first = Aspect::new(&source);
    let second = Aspect::new(&source);
    let e = Entity::new(1);
    source.add(e.clone());

    assert_eq!(e.dispatcher().len(), 2);
    assert!(e.dispatcher().has_keyed(first.id()));
    assert!(e.dispatcher().has_keyed(second.id()));

    // Re-attaching and re-matching never doubles the wiring.
    first.attach();
    let refetch = first.clone().all([]);
    assert_eq!(e.dispatcher().len(), 2);
    drop(refetch);

    first.detach();
    assert_eq!(e.dispatcher().len(), 1);
    assert!(!e.dispatcher().has_keyed(first.id()));
    assert!(e.dispatcher().has_keyed(second.id()));

    first.detach();
    assert_eq!(e.dispatcher().len(), 1);
}

#[test]
fn aspect_wiring_is_locked_against_strangers() {
    let source = EntityCollection::new();
    let _aspect = Aspect::new(&source);
    let e = Entity::new(1);
    source.add(e.clone());

    // The per-entity slot belongs to the aspect; nobody else may free it.
    assert!(e.dispatcher().remove_listener_at(0).is_err());
}

#[test]
fn attach_and_detach_are_idempotent() {
    let source = EntityCollection::new();
    let aspect = Aspect::new(&source);
    let recorder = watched(&aspect);

    aspect.attach();
    assert!(recorder.take().is_empty());

    aspect.detach();
    aspect.detach();
    assert_eq!(recorder.take(), vec!["detached"]);

    aspect.attach();
    assert_eq!(recorder.take(), vec!["attached"]);
}

#[test]
fn a_detached_aspect_goes_quiet() {
    let source = EntityCollection::new();
    let aspect = Aspect::new(&source);
    let e = Entity::new(1);
    source.add(e.clone());
    aspect.detach();

    let before = aspect.entities();
    source.add(Entity::new(2));
    e.components().add(Comp::new(Pos));

    // The last snapshot stays readable but nothing updates it.
    assert_eq!(aspect.entities(), before);

    // Re-attaching recomputes from the live source.
    aspect.attach();
    assert_eq!(aspect.entities().len(), 2);
}

#[test]
fn constraint_mutation_refilters_the_source() {
    let source = EntityCollection::new();
    let posed = Entity::new(1);
    posed.components().add(Comp::new(Pos));
    let bare = Entity::new(2);
    source.add_all([posed.clone(), bare.clone()]);

    let aspect = Aspect::new(&source);
    assert_eq!(aspect.entities().len(), 2);

    let aspect = aspect.all([Kind::of::<Pos>()]);
    assert_eq!(aspect.entities(), vec![posed.clone()]);
    assert!(aspect.matches(&posed));
    assert!(!aspect.matches(&bare));

    // Constraint sets deduplicate, first occurrence wins.
    let aspect = aspect.all([Kind::of::<Pos>(), Kind::of::<Pos>()]);
    assert_eq!(aspect.entities(), vec![posed]);
}

#[test]
fn late_entities_are_watched_even_when_unmatched() {
    let source = EntityCollection::new();
    let aspect = Aspect::new(&source).all([Kind::of::<Pos>()]);
    let recorder = watched(&aspect);

    let e = Entity::new(5);
    source.add(e.clone());
    recorder.take();

    // Not a member, but the aspect is listening: gaining the component
    // admits it.
    e.components().add(Comp::new(Pos));
    assert_eq!(recorder.take(), vec!["+e 5", "+c 5 x1"]);
}

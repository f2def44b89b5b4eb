//! Component handles, kind matching, and the container's type index.

use aspecs::prelude::*;

struct Health(i32);
impl Component for Health {}

struct Mana(i32);
impl Component for Mana {}

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

#[test]
fn typed_retrieval() {
    let container = ComponentContainer::new();
    container.add(Comp::new(Health(10)));
    container.add(Comp::new(Mana(4)));

    let health = container.get::<Health>().unwrap();
    assert_eq!(health.get_as::<Health>().unwrap().0, 10);
    assert!(health.get_as::<Mana>().is_none());
    assert!(health.is::<Health>());
    assert!(!health.is::<Mana>());
}

#[test]
fn comp_equality_is_identity_not_value() {
    let container = ComponentContainer::new();
    let a = Comp::new(Health(5));
    let b = Comp::new(Health(5));

    // Equal payloads, different components.
    container.add(a.clone());
    container.add(b.clone());
    assert_eq!(container.len(), 2);

    // A clone of a handle is the same component.
    assert!(!container.add(a.clone()));
    assert_eq!(container.len(), 2);
}

#[test]
fn colliding_tags_count_as_one_kind() {
    let container = ComponentContainer::new();
    container.add(Comp::new(Burning));
    container.add(Comp::new(Wet));
    container.add(Comp::new(Health(3)));

    // Burning and Wet share a tag, so a query for either finds both.
    assert_eq!(container.get_all::<Burning>().len(), 2);
    assert_eq!(container.get_all::<Wet>().len(), 2);
    assert_eq!(container.get_all_by(&Kind::tag("status")).len(), 2);

    // The untagged component matches only its own type.
    assert_eq!(container.get_all::<Health>().len(), 1);
    assert!(!container.contains_kind(&Kind::tag("health")));
}

#[test]
fn get_returns_the_first_in_container_order() {
    let container = ComponentContainer::new();
    let first = Comp::new(Burning);
    container.add(first.clone());
    container.add(Comp::new(Wet));

    assert_eq!(container.get_by(&Kind::tag("status")).unwrap(), first);
}

#[test]
fn bare_tag_queries_ignore_untagged_components() {
    let container = ComponentContainer::new();
    container.add(Comp::new(Health(1)));
    assert!(container.get_all_by(&Kind::tag("anything")).is_empty());
}

#[test]
fn the_index_follows_mutation() {
    let container = ComponentContainer::new();
    container.add(Comp::new(Health(1)));
    assert_eq!(container.get_all::<Health>().len(), 1);

    let second = Comp::new(Health(2));
    container.add(second.clone());
    assert_eq!(container.get_all::<Health>().len(), 2);

    container.remove(&second);
    assert_eq!(container.get_all::<Health>().len(), 1);

    container.clear();
    assert!(container.get_all::<Health>().is_empty());
    assert!(container.get::<Health>().is_none());
}

#[test]
fn repeated_queries_are_consistent() {
    let container = ComponentContainer::new();
    container.add(Comp::new(Burning));

    // Second lookup comes from the cache; it must agree with the first.
    let first = container.get_all_by(&Kind::tag("status"));
    let second = container.get_all_by(&Kind::tag("status"));
    assert_eq!(first, second);
}

#[test]
fn the_cache_maintainer_is_locked_in() {
    let container = ComponentContainer::new();
    assert!(container.remove_listener_at(0).is_err());
}

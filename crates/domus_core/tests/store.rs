//! Integration tests for domains, commands, events and inspectors
//!
//! These tests verify that:
//! - Domain instances are cached per argument and torn down with their last
//!   consumer, unless a plain lookup pinned them
//! - Command batches apply their effects before events fire and subscribers settle
//! - Re-entrant sends are queued instead of nested
//! - Inspector hooks see every lifecycle step ahead of subscriber notifications

use domus_core::inspector::{CommandPhase, DomainPhase, QueryPhase, StatePhase};
use domus_core::{
    Command, DomainDef, Event, Extern, InspectorRecord, Query, State, Store, StoreError,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex, OnceLock};

#[derive(Clone)]
struct Counter {
    value: Query<(), i32>,
    add: Command<i32>,
    added: Event<i32>,
}

fn counter() -> DomainDef<(), Counter> {
    DomainDef::new("Counter", |d, _: &()| {
        let count = d.state("Count", 0i32);
        let value = d.query("Value", move |ctx, _: &()| ctx.get(count));
        let added = d.event("Added");
        let add = d.command("Add", move |ctx, by: i32| {
            let next = ctx.get(count)? + by;
            Ok(vec![added.emit(next), count.set(next)])
        });
        Ok(Counter {
            value,
            add,
            added,
        })
    })
}

#[derive(Clone)]
struct Item {
    text: Query<(), String>,
    set_text: Command<String>,
}

fn item() -> DomainDef<u32, Item> {
    DomainDef::new("TodoItem", |d, _id: &u32| {
        let text = d.state("Text", String::new());
        Ok(Item {
            text: d.query("Text", move |ctx, _: &()| ctx.get(text)),
            set_text: d.command("SetText", move |_, value: String| Ok(vec![text.set(value)])),
        })
    })
}

fn collect<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |value: &T| sink.lock().unwrap().push(value.clone()))
}

/// Test the basic counter flow: send, query, subscribe
#[test]
fn test_counter() {
    let store = Store::new();
    let counter = store.get_domain(&counter(), ()).unwrap();
    assert_eq!(store.query(counter.value, ()).unwrap(), 0);

    let (seen, observer) = collect::<i32>();
    let _sub = store.subscribe_query(counter.value, (), observer).unwrap();

    store.send(counter.add, 2).unwrap();
    store.send(counter.add, 3).unwrap();
    assert_eq!(store.query(counter.value, ()).unwrap(), 5);
    assert_eq!(*seen.lock().unwrap(), vec![2, 5]);
}

/// Test that the same argument resolves to the same instance and that a
/// fresh request after teardown starts from the defaults
#[test]
fn test_per_item_domain_lifecycle() {
    let store = Store::new();
    let def = item();

    let (first, first_sub) = store.subscribe_domain(&def, 1).unwrap();
    let (again, again_sub) = store.subscribe_domain(&def, 1).unwrap();
    let (other, other_sub) = store.subscribe_domain(&def, 2).unwrap();
    assert_eq!(first.text.id(), again.text.id());
    assert_ne!(first.text.id(), other.text.id());
    assert_eq!(store.domain_count(), 2);

    store.send(first.set_text, "milk".to_string()).unwrap();
    assert_eq!(store.query(again.text, ()).unwrap(), "milk");
    assert_eq!(store.query(other.text, ()).unwrap(), "");

    drop(first_sub);
    assert_eq!(store.query(again.text, ()).unwrap(), "milk");

    drop(again_sub);
    assert_eq!(store.domain_count(), 1);
    assert!(matches!(store.query(first.text, ()), Err(StoreError::UnknownKey(_))));
    assert!(matches!(
        store.send(first.set_text, "eggs".to_string()),
        Err(StoreError::UnknownKey(_))
    ));

    let (fresh, _fresh_sub) = store.subscribe_domain(&def, 1).unwrap();
    assert_eq!(store.query(fresh.text, ()).unwrap(), "");
    drop(other_sub);
    assert_eq!(store.domain_count(), 1);
}

/// Test that query subscriptions keep a subscribed domain alive after the
/// domain subscription itself is gone
#[test]
fn test_query_subscription_retains_domain() {
    let store = Store::new();
    let (item, domain) = store.subscribe_domain(&item(), 7).unwrap();

    let first = store.subscribe_query(item.text, (), |_: &String| {}).unwrap();
    let second = store.subscribe_query(item.text, (), |_: &String| {}).unwrap();
    drop(domain);
    first.unsubscribe();
    assert_eq!(store.domain_count(), 1);
    assert!(second.is_active());

    drop(second);
    assert_eq!(store.domain_count(), 0);
}

/// Test that subscribing and unsubscribing before any write leaves a looked
/// up domain and its state untouched
#[test]
fn test_subscribe_then_unsubscribe_keeps_state() {
    let store = Store::new();
    let counter = store.get_domain(&counter(), ()).unwrap();
    store.send(counter.add, 5).unwrap();

    let query_sub = store.subscribe_query(counter.value, (), |_: &i32| {}).unwrap();
    drop(query_sub);
    let event_sub = store.subscribe_event(counter.added, |_: &i32| {}).unwrap();
    drop(event_sub);
    let (_, domain_sub) = store.subscribe_domain(&self::counter(), ()).unwrap();
    drop(domain_sub);

    assert_eq!(store.domain_count(), 1);
    assert_eq!(store.query(counter.value, ()).unwrap(), 5);
    let again = store.get_domain(&self::counter(), ()).unwrap();
    assert_eq!(store.query(again.value, ()).unwrap(), 5);
}

/// Test that a parent domain keeps the domains it uses alive
#[test]
fn test_nested_domains() {
    let parent = DomainDef::new("List", |d, _: &()| {
        let first = d.use_domain(&item(), 1)?;
        let second = d.use_domain(&item(), 2)?;
        let (left, right) = (first.text, second.text);
        let both = d.query("Both", move |ctx, _: &()| {
            Ok(format!("{},{}", ctx.query(left, ())?, ctx.query(right, ())?))
        });
        Ok((both, first.set_text))
    });

    let store = Store::new();
    let ((both, set_first), subscription) = store.subscribe_domain(&parent, ()).unwrap();
    assert_eq!(store.domain_count(), 3);

    // the child is shared with direct consumers
    let child = store.get_domain(&item(), 1).unwrap();
    store.send(child.set_text, "a".to_string()).unwrap();
    store.send(set_first, "b".to_string()).unwrap();
    assert_eq!(store.query(both, ()).unwrap(), "b,");

    // the looked up child outlives its parent
    drop(subscription);
    assert_eq!(store.domain_count(), 1);
    assert_eq!(store.query(child.text, ()).unwrap(), "b");
}

/// Test that a domain requesting itself while being built fails
#[test]
fn test_cyclic_domain() {
    fn looping() -> DomainDef<(), ()> {
        DomainDef::new("Loop", |d, _: &()| d.use_domain(&looping(), ()))
    }

    let store = Store::new();
    let err = store.get_domain(&looping(), ()).unwrap_err();
    assert!(matches!(err, StoreError::CyclicDomain { .. }), "{err}");
    assert_eq!(store.domain_count(), 0);
}

/// Test that events fire after the batch's writes are visible
#[test]
fn test_events_observe_post_write_state() {
    let store = Store::new();
    let counter = store.get_domain(&counter(), ()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let reader = store.clone();
    let value = counter.value;
    let _sub = store
        .subscribe_event(counter.added, move |payload: &i32| {
            let current = reader.query(value, ()).unwrap();
            sink.lock().unwrap().push((*payload, current));
        })
        .unwrap();

    store.send(counter.add, 4).unwrap();
    store.emit_event(counter.added, 100).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![(4, 4), (100, 4)]);
}

/// Test that event listeners are called in subscription order and that a
/// cancelled listener is never called again
#[test]
fn test_event_subscription_order_and_cancel() {
    let store = Store::new();
    let counter = store.get_domain(&counter(), ()).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&order);
    let first = store
        .subscribe_event(counter.added, move |_: &i32| sink.lock().unwrap().push("first"))
        .unwrap();
    let sink = Arc::clone(&order);
    let _second = store
        .subscribe_event(counter.added, move |_: &i32| sink.lock().unwrap().push("second"))
        .unwrap();

    store.emit_event(counter.added, 1).unwrap();
    drop(first);
    store.emit_event(counter.added, 2).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "second"]);
}

/// Test that a send from inside a subscriber runs as its own batch after
/// the current one
#[test]
fn test_reentrant_send_is_queued() {
    let store = Store::new();
    let counter = store.get_domain(&counter(), ()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let inner = store.clone();
    let add = counter.add;
    let _sub = store
        .subscribe_query(counter.value, (), move |value: &i32| {
            sink.lock().unwrap().push(*value);
            if *value == 1 {
                inner.send(add, 10).unwrap();
                // not applied yet
                sink.lock().unwrap().push(inner.query(counter.value, ()).unwrap());
            }
        })
        .unwrap();

    store.send(counter.add, 1).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1, 1, 11]);
}

/// Test that a failing effect function applies nothing
#[test]
fn test_effect_failure_applies_nothing() {
    let def = DomainDef::new("Guarded", |d, _: &()| {
        let count = d.state("Count", 0i32);
        let add = d.command("Add", move |ctx, by: i32| {
            if by < 0 {
                anyhow::bail!("negative amount {by}");
            }
            Ok(vec![count.set(ctx.get(count)? + by)])
        });
        let write_both = d.command("WriteBoth", move |_, other: State<String>| {
            Ok(vec![count.set(99), other.set("x".to_string())])
        });
        Ok((count, add, write_both))
    });
    let text_holder = DomainDef::new("Holder", |d, _: &()| Ok(d.state("Text", String::new())));

    let store = Store::new();
    let (count, add, write_both) = store.get_domain(&def, ()).unwrap();
    let reader = DomainDef::new("Reader", move |d, _: &()| {
        Ok(d.query("Count", move |ctx, _: &()| ctx.get(count)))
    });
    let read = store.get_domain(&reader, ()).unwrap();

    let err = store.send(add, -1).unwrap_err();
    match err {
        StoreError::EffectFunctionFailure { key, source } => {
            assert_eq!(key.name(), "Guarded.Add");
            assert_eq!(source.to_string(), "negative amount -1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.query(read, ()).unwrap(), 0);

    // one stale target rejects the whole effect list
    let (stale, subscription) = store.subscribe_domain(&text_holder, ()).unwrap();
    drop(subscription);
    let err = store.send(write_both, stale).unwrap_err();
    assert!(matches!(err, StoreError::UnknownKey(_)), "{err}");
    assert_eq!(store.query(read, ()).unwrap(), 0);
}

/// Test nested commands and the depth bound
#[test]
fn test_nested_commands() {
    let slot: Arc<OnceLock<Command<()>>> = Arc::new(OnceLock::new());
    let inner = Arc::clone(&slot);
    let def = DomainDef::new("Nested", move |d, _: &()| {
        let count = d.state("Count", 0i32);
        let bump = d.command("Bump", move |ctx, by: i32| Ok(vec![count.set(ctx.get(count)? + by)]));
        let twice = d.command("Twice", move |_, by: i32| Ok(vec![bump.call(by), bump.call(by)]));
        let inner = Arc::clone(&inner);
        let forever = d.command("Forever", move |ctx, ()| {
            let me = *inner.get().ok_or_else(|| anyhow::anyhow!("not wired"))?;
            Ok(vec![count.set(ctx.get(count)? + 1), me.call(())])
        });
        let value = d.query("Value", move |ctx, _: &()| ctx.get(count));
        Ok((value, twice, forever))
    });

    let store = Store::builder().max_command_depth(4).build();
    let (value, twice, forever) = store.get_domain(&def, ()).unwrap();
    slot.set(forever).unwrap();

    store.send(twice, 5).unwrap();
    assert_eq!(store.query(value, ()).unwrap(), 10);

    let err = store.send(forever, ()).unwrap_err();
    assert!(
        matches!(err, StoreError::CommandDepthExceeded { limit: 4, .. }),
        "{err}"
    );
    // writes applied before the failing level are kept
    assert_eq!(store.query(value, ()).unwrap(), 14);
}

/// Test extern defaults and overrides
#[test]
fn test_externs() {
    let greeting = Extern::new("Greeting", "hello".to_string());
    let ext = greeting.clone();
    let def = DomainDef::new("Greeter", move |d, _: &()| {
        let text = d.get_extern(&ext);
        let state = d.state("Text", text);
        Ok(d.query("Text", move |ctx, _: &()| ctx.get(state)))
    });

    let store = Store::new();
    let text = store.get_domain(&def, ()).unwrap();
    assert_eq!(store.query(text, ()).unwrap(), "hello");

    let store = Store::builder()
        .provide(greeting.provide("bonjour".to_string()))
        .build();
    let text = store.get_domain(&def, ()).unwrap();
    assert_eq!(store.query(text, ()).unwrap(), "bonjour");
}

fn label(record: &InspectorRecord) -> String {
    let phase = match record {
        InspectorRecord::State(r) => match r.phase {
            StatePhase::Created => "created",
            StatePhase::Updated => "updated",
            StatePhase::Destroyed => "destroyed",
        },
        InspectorRecord::Query(r) => match r.phase {
            QueryPhase::Created => "created",
            QueryPhase::Dirty => "dirty",
            QueryPhase::Clean => "clean",
            QueryPhase::Evaluated { .. } => "evaluated",
            QueryPhase::Subscribed => "subscribed",
            QueryPhase::Unsubscribed => "unsubscribed",
            QueryPhase::Destroyed => "destroyed",
        },
        InspectorRecord::Domain(r) => match r.phase {
            DomainPhase::Created => "created",
            DomainPhase::Destroyed => "destroyed",
        },
        InspectorRecord::Event(_) => "emitted",
        InspectorRecord::Command(r) => match r.phase {
            CommandPhase::Dispatched => "dispatched",
            CommandPhase::Applied { .. } => "applied",
            CommandPhase::Failed { .. } => "failed",
        },
    };
    format!("{} {} {}", record.source(), record.key().name(), phase)
}

/// Test that inspectors see every step, in order, before subscribers
#[test]
fn test_inspector_ordering() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let store = Store::builder()
        .inspector(move |record: &InspectorRecord| sink.lock().unwrap().push(label(record)))
        .build();

    let (counter, domain) = store.subscribe_domain(&counter(), ()).unwrap();
    let sink = Arc::clone(&log);
    let sub = store
        .subscribe_query(counter.value, (), move |value: &i32| {
            sink.lock().unwrap().push(format!("notify {value}"))
        })
        .unwrap();
    assert_eq!(
        std::mem::take(&mut *log.lock().unwrap()),
        vec![
            "state Counter.Count created",
            "domain Counter created",
            "query Counter.Value created",
            "query Counter.Value evaluated",
            "query Counter.Value subscribed",
        ]
    );

    store.send(counter.add, 1).unwrap();
    assert_eq!(
        std::mem::take(&mut *log.lock().unwrap()),
        vec![
            "command Counter.Add dispatched",
            "state Counter.Count updated",
            "query Counter.Value dirty",
            "command Counter.Add applied",
            "event Counter.Added emitted",
            "query Counter.Value evaluated",
            "notify 1",
        ]
    );

    drop(sub);
    drop(domain);
    assert_eq!(
        std::mem::take(&mut *log.lock().unwrap()),
        vec![
            "query Counter.Value unsubscribed",
            "query Counter.Value destroyed",
            "state Counter.Count destroyed",
            "domain Counter destroyed",
        ]
    );
}

/// Test that destroy tears everything down and cancels subscriptions
#[test]
fn test_destroy() {
    let store = Store::new();
    let counter = store.get_domain(&counter(), ()).unwrap();
    let query_sub = store.subscribe_query(counter.value, (), |_: &i32| {}).unwrap();
    let event_sub = store.subscribe_event(counter.added, |_: &i32| {}).unwrap();

    store.destroy();
    assert!(store.is_destroyed());
    assert!(!query_sub.is_active());
    assert!(!event_sub.is_active());
    assert_eq!(store.domain_count(), 0);
    assert!(matches!(store.get_domain(&item(), 1), Err(StoreError::Destroyed)));
    assert!(matches!(store.emit_event(counter.added, 1), Err(StoreError::Destroyed)));
}

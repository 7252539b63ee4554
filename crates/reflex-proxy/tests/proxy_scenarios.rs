//! End-to-end scenarios for the observable proxy.
//!
//! Each test wraps a small host record, drives it through the public
//! `ObservableProxy` API and checks the derived state (computed fields,
//! undo history, validation and dirtiness) after every step.
//!
//! Tests cover:
//! - Validation with undo and dirty tracking on a single field
//! - Computed fields: eager recompute, diamonds, shadowing, cycles
//! - Undo debounce and capacity with a manual clock
//! - Re-entrant listeners
//! - Save (including shadowing computed values), load and sync write-back
//! - Undo in sync mode
//! - Nested path access with optional chaining and path listeners
//! - Typed host records

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use reflex_proxy::{
    ComputeScope, ComputedSpec, HostRecord, JsonRecord, ManualClock, ObservableProxy, ProxyConfig,
    ProxyError, TypedRecord, UndoConfig, ValueType,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn record(value: Value) -> JsonRecord {
    JsonRecord::from_value(value).unwrap()
}

fn with_undo() -> ProxyConfig {
    ProxyConfig::default().with_undo(UndoConfig::enabled())
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn positive(value: &Value) -> Option<String> {
    match value.as_i64() {
        Some(n) if n > 0 => None,
        _ => Some("must be positive".to_string()),
    }
}

fn sum_of(
    deps: &'static [&'static str],
) -> impl Fn(&mut ComputeScope<'_>) -> Result<Value, ProxyError> {
    move |scope| {
        let mut total = 0i64;
        for dep in deps {
            total += scope.get_as::<i64>(dep)?;
        }
        Ok(json!(total))
    }
}

// ---------------------------------------------------------------------------
// Validation, undo and dirtiness together
// ---------------------------------------------------------------------------

#[test]
fn age_validation_undo_and_dirty_stay_consistent() {
    init_tracing();
    let mut host = record(json!({"age": 30}));
    let mut proxy = ObservableProxy::new(&mut host, with_undo());
    proxy.field("age", ValueType::Int).unwrap();
    proxy.add_validator("age", positive).unwrap();
    assert!(proxy.is_valid());

    proxy.set("age", json!(-5)).unwrap();
    assert_eq!(proxy.validation_for("age"), ["must be positive"]);
    assert!(!proxy.is_valid());
    assert!(proxy.is_field_dirty("age"));

    assert!(proxy.undo("age").unwrap());
    assert_eq!(proxy.get("age").unwrap(), json!(30));
    assert!(proxy.is_valid());
    assert!(!proxy.is_field_dirty("age"));
    assert!(proxy.can_redo("age"));

    assert!(proxy.redo("age").unwrap());
    assert_eq!(proxy.get_as::<i64>("age").unwrap(), -5);
    assert!(!proxy.is_valid());
}

#[test]
fn add_validator_validates_immediately() {
    let mut host = record(json!({"age": 0}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy.add_validator("age", positive).unwrap();
    assert_eq!(proxy.validation_for("age"), ["must be positive"]);
    assert_eq!(
        proxy.validation_errors().get("age"),
        Some(&vec!["must be positive".to_string()])
    );
}

#[test]
fn add_validator_on_unknown_field_fails() {
    let mut host = record(json!({"age": 1}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    let err = proxy.add_validator("nonexistent", positive).unwrap_err();
    assert_eq!(err, ProxyError::UnknownField { name: "nonexistent".into() });
    assert!(proxy.is_valid());
}

#[test]
fn faulting_validators_become_messages() {
    let mut host = record(json!({"email": "ada@example.com"}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy
        .add_fallible_validator("email", |_| Err("lookup service down".into()))
        .unwrap();
    proxy
        .add_fallible_validator("email", |v| {
            if v.as_str().is_some_and(|s| s.ends_with("@example.com")) {
                panic!("example domains are not allowed");
            }
            Ok(None)
        })
        .unwrap();
    proxy
        .add_validator("email", |v| {
            v.as_str()
                .filter(|s| !s.contains('@'))
                .map(|_| "must contain @".to_string())
        })
        .unwrap();

    assert_eq!(
        proxy.validation_for("email"),
        [
            "validator fault: lookup service down",
            "validator panicked: example domains are not allowed",
        ]
    );
    assert!(!proxy.is_valid());

    proxy.set("email", json!("nobody")).unwrap();
    assert_eq!(proxy.validation_for("email").len(), 2);
    assert_eq!(proxy.validation_for("email")[1], "must contain @");
}

#[test]
fn reset_validation_clears_and_optionally_reruns() {
    let mut host = record(json!({"a": 0, "b": 0}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy.add_validator("a", positive).unwrap();
    proxy.add_validator("b", positive).unwrap();
    assert!(!proxy.is_valid());

    proxy.reset_validation(Some("a"), false).unwrap();
    assert!(proxy.validation_for("a").is_empty());
    assert!(!proxy.is_valid());

    proxy.reset_validation(None, false).unwrap();
    assert!(proxy.is_valid());

    proxy.reset_validation(None, true).unwrap();
    assert_eq!(proxy.validation_errors().len(), 2);
}

#[test]
fn validity_is_observable() {
    let mut host = record(json!({"age": 1}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    proxy.watch_valid(move |valid| sink.borrow_mut().push(*valid));
    proxy.add_validator("age", positive).unwrap();
    proxy.set("age", json!(-1)).unwrap();
    proxy.set("age", json!(-2)).unwrap();
    proxy.set("age", json!(3)).unwrap();
    assert_eq!(*seen.borrow(), vec![false, true]);
}

// ---------------------------------------------------------------------------
// Computed fields
// ---------------------------------------------------------------------------

#[test]
fn full_name_recomputes_before_set_returns() {
    init_tracing();
    let mut host = record(json!({"first": "Ada", "last": "Lovelace"}));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy
        .register_computed("full", ["first", "last"], |scope| {
            let first: String = scope.get_as("first")?;
            let last: String = scope.get_as("last")?;
            Ok(json!(format!("{first} {last}")))
        })
        .unwrap();
    assert_eq!(proxy.computed("full").unwrap(), json!("Ada Lovelace"));

    let sink = Rc::clone(&seen);
    proxy.on_computed_change("full", move |_, change| {
        sink.borrow_mut().push(change.value.clone());
        Ok(())
    });

    proxy.set("first", json!("Grace")).unwrap();
    assert_eq!(*seen.borrow(), vec![json!("Grace Lovelace")]);
    assert_eq!(proxy.computed_as::<String>("full").unwrap(), "Grace Lovelace");
    assert_eq!(proxy.evaluation_count("full"), 2);
}

#[test]
fn computed_listeners_only_fire_on_value_change() {
    let mut host = record(json!({"n": 3}));
    let fired = Rc::new(RefCell::new(0));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy
        .register_computed("odd", ["n"], |scope| {
            let n: i64 = scope.get_as("n")?;
            Ok(json!(n % 2 == 1))
        })
        .unwrap();
    let counter = Rc::clone(&fired);
    proxy.on_computed_change("odd", move |_, _| {
        *counter.borrow_mut() += 1;
        Ok(())
    });

    proxy.set("n", json!(5)).unwrap();
    assert_eq!(*fired.borrow(), 0);
    proxy.set("n", json!(6)).unwrap();
    assert_eq!(*fired.borrow(), 1);
    assert_eq!(proxy.evaluation_count("odd"), 3);
}

#[test]
fn diamond_recomputes_once_per_set() {
    let mut host = record(json!({"a": 1, "x": 0}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy.register_computed("b", ["a"], sum_of(&["a"])).unwrap();
    proxy.register_computed("c", ["a"], sum_of(&["a"])).unwrap();
    proxy
        .register_computed("d", ["b", "c", "x"], sum_of(&["b", "c", "x"]))
        .unwrap();
    assert_eq!(proxy.evaluation_count("d"), 1);

    proxy.set("a", json!(2)).unwrap();
    assert_eq!(proxy.evaluation_count("d"), 2);
    assert_eq!(proxy.computed("d").unwrap(), json!(4));
}

#[test]
fn load_dict_recomputes_each_computed_once() {
    let mut host = record(json!({"a": 1, "x": 0}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy.register_computed("b", ["a"], sum_of(&["a"])).unwrap();
    proxy
        .register_computed("d", ["b", "x"], sum_of(&["b", "x"]))
        .unwrap();
    let before = proxy.evaluation_count("d");

    proxy
        .load_dict(&object(json!({"a": 5, "x": 3, "unknown": true})), false)
        .unwrap();

    assert_eq!(proxy.evaluation_count("d"), before + 1);
    assert_eq!(proxy.computed("d").unwrap(), json!(8));
    assert!(!proxy.field_names().contains(&"unknown".to_string()));
}

#[test]
fn load_dict_can_reset_missing_fields() {
    let mut host = record(json!({"a": 1, "name": "Ada", "tags": ["x"]}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy.load_dict(&object(json!({"a": 2})), true).unwrap();
    assert_eq!(proxy.get("a").unwrap(), json!(2));
    assert_eq!(proxy.get("name").unwrap(), json!(""));
    assert_eq!(proxy.get("tags").unwrap(), json!([]));

    proxy.update(&object(json!({"name": "Grace"}))).unwrap();
    assert_eq!(proxy.get("name").unwrap(), json!("Grace"));
    assert_eq!(proxy.get("a").unwrap(), json!(2));
}

#[test]
fn batch_defers_refresh_until_the_end() {
    let mut host = record(json!({"a": 1, "b": 1}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy
        .register_computed("total", ["a", "b"], sum_of(&["a", "b"]))
        .unwrap();
    proxy
        .batch(|p| {
            p.set("a", json!(10))?;
            p.set("b", json!(20))?;
            Ok(())
        })
        .unwrap();
    assert_eq!(proxy.evaluation_count("total"), 2);
    assert_eq!(proxy.computed("total").unwrap(), json!(30));
}

#[test]
fn computed_may_shadow_its_own_field() {
    let mut host = record(json!({"name": "ada"}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy
        .register_computed("name", ["name"], |scope| {
            let raw: String = scope.get_as("name")?;
            Ok(json!(raw.to_uppercase()))
        })
        .unwrap();

    assert_eq!(proxy.get("name").unwrap(), json!("ada"));
    assert_eq!(proxy.computed("name").unwrap(), json!("ADA"));

    proxy.set("name", json!("grace")).unwrap();
    assert_eq!(proxy.get("name").unwrap(), json!("grace"));
    assert_eq!(proxy.computed("name").unwrap(), json!("GRACE"));
}

#[test]
fn validators_on_computed_fields_follow_recomputation() {
    let mut host = record(json!({"a": 1, "b": 2}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy
        .register_computed("total", ["a", "b"], sum_of(&["a", "b"]))
        .unwrap();
    proxy.add_validator("total", positive).unwrap();
    assert!(proxy.is_valid());

    proxy.set("a", json!(-10)).unwrap();
    assert_eq!(proxy.validation_for("total"), ["must be positive"]);
    assert!(proxy.dirty_fields().iter().all(|f| f != "total"));
}

#[test]
fn forward_references_resolve_once_registered() {
    let mut host = record(json!({"price": 10, "qty": 3}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy
        .register_computed("total", ["subtotal"], sum_of(&["subtotal"]))
        .unwrap();
    proxy
        .register_computed("subtotal", ["price", "qty"], |scope| {
            let price: i64 = scope.get_as("price")?;
            let qty: i64 = scope.get_as("qty")?;
            Ok(json!(price * qty))
        })
        .unwrap();

    assert_eq!(proxy.computed("total").unwrap(), json!(30));
    proxy.set("qty", json!(4)).unwrap();
    assert_eq!(proxy.computed("total").unwrap(), json!(40));
}

#[test]
fn sequential_cycle_rejects_second_registration() {
    let mut host = record(json!({}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy.register_computed("a", ["b"], sum_of(&["b"])).unwrap();
    let err = proxy
        .register_computed("b", ["a"], sum_of(&["a"]))
        .unwrap_err();
    assert_eq!(
        err,
        ProxyError::CircularDependency {
            path: vec!["b".into(), "a".into(), "b".into()],
        }
    );
    assert!(proxy.is_computed("a"));
    assert!(!proxy.is_computed("b"));
}

#[test]
fn atomic_cycle_registers_neither() {
    let mut host = record(json!({}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    let err = proxy
        .register_computed_many([
            ComputedSpec::new("a", ["b"], sum_of(&["b"])),
            ComputedSpec::new("b", ["a"], sum_of(&["a"])),
        ])
        .unwrap_err();
    assert!(matches!(err, ProxyError::CircularDependency { .. }));
    assert!(!proxy.is_computed("a"));
    assert!(!proxy.is_computed("b"));
}

#[test]
fn undeclared_cycle_fails_at_evaluation() {
    let mut host = record(json!({}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy
        .register_computed("a", Vec::<String>::new(), |scope| scope.get("b"))
        .unwrap();
    proxy
        .register_computed("b", Vec::<String>::new(), |scope| scope.get("a"))
        .unwrap();
    assert!(matches!(
        proxy.computed("a"),
        Err(ProxyError::CircularDependency { .. })
    ));
}

#[test]
fn duplicate_computed_is_rejected() {
    let mut host = record(json!({"a": 1}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy.register_computed("twice", ["a"], sum_of(&["a"])).unwrap();
    assert_eq!(
        proxy
            .register_computed("twice", ["a"], sum_of(&["a"]))
            .unwrap_err(),
        ProxyError::DuplicateComputed { name: "twice".into() }
    );
}

#[test]
fn refresh_errors_do_not_stop_other_computeds() {
    let mut host = record(json!({"a": 1}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy
        .register_computed("fragile", ["a"], |scope| {
            let a: i64 = scope.get_as("a")?;
            if a > 5 {
                return Err(ProxyError::compute(scope.name(), "a is too large"));
            }
            Ok(json!(a))
        })
        .unwrap();
    proxy.register_computed("sturdy", ["a"], sum_of(&["a"])).unwrap();

    let err = proxy.set("a", json!(10)).unwrap_err();
    assert!(matches!(err, ProxyError::Compute { ref field, .. } if field == "fragile"));
    assert_eq!(proxy.get("a").unwrap(), json!(10));
    assert_eq!(proxy.computed("sturdy").unwrap(), json!(10));
}

// ---------------------------------------------------------------------------
// Undo
// ---------------------------------------------------------------------------

#[test]
fn debounced_burst_undoes_in_one_step() {
    let mut host = record(json!({"title": "draft"}));
    let clock = ManualClock::new();
    let config = ProxyConfig::default()
        .with_undo(UndoConfig::enabled().with_debounce(Duration::from_millis(500)));
    let mut proxy = ObservableProxy::with_clock(&mut host, config, Rc::new(clock.clone()));

    for text in ["d", "dr", "dra", "draf", "draft!"] {
        proxy.set("title", json!(text)).unwrap();
        clock.advance(Duration::from_millis(90));
    }
    assert_eq!(proxy.undo_depth("title"), 1);

    assert!(proxy.undo("title").unwrap());
    assert_eq!(proxy.get("title").unwrap(), json!("draft"));
    assert!(!proxy.can_undo("title"));
}

#[test]
fn undo_capacity_evicts_earliest() {
    let mut host = record(json!({"n": 0}));
    let config = ProxyConfig::default().with_undo(UndoConfig::enabled().with_max_depth(3));
    let mut proxy = ObservableProxy::new(&mut host, config);
    for n in 1..=4 {
        proxy.set("n", json!(n)).unwrap();
    }
    assert_eq!(proxy.undo_depth("n"), 3);
    for _ in 0..3 {
        assert!(proxy.undo("n").unwrap());
    }
    assert_eq!(proxy.get("n").unwrap(), json!(1));
    assert!(!proxy.undo("n").unwrap());
}

#[test]
fn undo_is_isolated_per_field() {
    let mut host = record(json!({"a": 0, "b": 0}));
    let mut proxy = ObservableProxy::new(&mut host, with_undo());
    proxy.set("a", json!(1)).unwrap();
    proxy.set("b", json!(1)).unwrap();
    proxy.undo("a").unwrap();
    assert_eq!(proxy.get("a").unwrap(), json!(0));
    assert_eq!(proxy.get("b").unwrap(), json!(1));
    assert!(proxy.can_undo("b"));
}

#[test]
fn undo_without_history_is_a_no_op() {
    let mut host = record(json!({"a": 0}));
    let mut proxy = ObservableProxy::new(&mut host, with_undo());
    assert!(!proxy.undo("a").unwrap());
    assert!(!proxy.redo("a").unwrap());
    assert!(!proxy.undo("never_created").unwrap());
}

#[test]
fn undo_config_can_target_one_field_before_it_exists() {
    let mut host = record(json!({"a": 0, "b": 0}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy.set_undo_config("a", UndoConfig::enabled().with_max_depth(1));
    proxy.set("a", json!(1)).unwrap();
    proxy.set("a", json!(2)).unwrap();
    proxy.set("b", json!(1)).unwrap();
    assert_eq!(proxy.undo_depth("a"), 1);
    assert!(!proxy.can_undo("b"));
    proxy.undo("a").unwrap();
    assert_eq!(proxy.get("a").unwrap(), json!(1));
}

#[test]
fn new_change_after_undo_clears_redo() {
    let mut host = record(json!({"a": 0}));
    let mut proxy = ObservableProxy::new(&mut host, with_undo());
    proxy.set("a", json!(1)).unwrap();
    proxy.undo("a").unwrap();
    assert!(proxy.can_redo("a"));
    proxy.set("a", json!(5)).unwrap();
    assert!(!proxy.can_redo("a"));
}

#[test]
fn collection_mutations_are_undoable() {
    let mut host = record(json!({"tags": ["a"], "meta": {}}));
    let mut proxy = ObservableProxy::new(&mut host, with_undo());
    proxy.push("tags", json!("b")).unwrap();
    proxy.insert_at("tags", 0, json!("z")).unwrap();
    proxy.insert_entry("meta", "k", json!(1)).unwrap();
    assert_eq!(proxy.get("tags").unwrap(), json!(["z", "a", "b"]));

    proxy.undo("tags").unwrap();
    assert_eq!(proxy.get("tags").unwrap(), json!(["a", "b"]));
    proxy.undo("meta").unwrap();
    assert_eq!(proxy.get("meta").unwrap(), json!({}));

    assert!(matches!(
        proxy.remove_at("tags", 9),
        Err(ProxyError::IndexOutOfRange { len: 2, .. })
    ));
    assert!(!proxy.remove_entry("meta", "absent").unwrap());
}

#[test]
fn burst_that_returns_to_its_start_is_not_undoable() {
    let mut host = record(json!({"n": 1}));
    let clock = ManualClock::new();
    let config = ProxyConfig::default()
        .with_undo(UndoConfig::enabled().with_debounce(Duration::from_millis(500)));
    let mut proxy = ObservableProxy::with_clock(&mut host, config, Rc::new(clock.clone()));

    proxy.set("n", json!(2)).unwrap();
    clock.advance(Duration::from_millis(100));
    proxy.set("n", json!(1)).unwrap();

    assert!(!proxy.undo("n").unwrap());
    assert_eq!(proxy.get("n").unwrap(), json!(1));
    assert!(!proxy.can_undo("n"));
    assert!(!proxy.can_redo("n"));
}

#[test]
fn sync_mode_undo_rewrites_the_host() {
    let mut host = record(json!({"n": 1, "tags": ["a"], "meta": {}}));
    let config = with_undo().with_sync(true);
    {
        let mut proxy = ObservableProxy::new(&mut host, config);

        proxy.set("n", json!(2)).unwrap();
        assert_eq!(proxy.host().get_field("n"), Some(json!(2)));
        proxy.undo("n").unwrap();
        assert_eq!(proxy.host().get_field("n"), Some(json!(1)));

        proxy.push("tags", json!("b")).unwrap();
        assert_eq!(proxy.host().get_field("tags"), Some(json!(["a", "b"])));
        proxy.undo("tags").unwrap();
        assert_eq!(proxy.host().get_field("tags"), Some(json!(["a"])));

        proxy.insert_entry("meta", "k", json!(1)).unwrap();
        proxy.undo("meta").unwrap();
        proxy.redo("meta").unwrap();
        assert_eq!(proxy.host().get_field("meta"), Some(json!({"k": 1})));
    }
    assert_eq!(host.get_field_value("n"), json!(1));
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

#[test]
fn reentrant_listeners_run_depth_first_in_order() {
    let mut host = record(json!({"a": 0, "b": 0}));
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());

    let l = Rc::clone(&log);
    proxy.on_change("a", move |p, change| {
        l.borrow_mut().push(format!("a1 start {}", change.value));
        p.set("b", change.value.clone())?;
        l.borrow_mut().push("a1 end".to_string());
        Ok(())
    });
    let l = Rc::clone(&log);
    proxy.on_change("a", move |_, _| {
        l.borrow_mut().push("a2".to_string());
        Ok(())
    });
    let l = Rc::clone(&log);
    proxy.on_change("b", move |_, change| {
        l.borrow_mut().push(format!("b {}", change.value));
        Ok(())
    });

    proxy.set("a", json!(7)).unwrap();
    assert_eq!(
        *log.borrow(),
        vec!["a1 start 7", "b 7", "a1 end", "a2"]
    );
    assert_eq!(proxy.get("b").unwrap(), json!(7));
}

#[test]
fn mutual_listeners_hit_the_depth_bound() {
    let mut host = record(json!({"ping": 0, "pong": 0}));
    let config = ProxyConfig::default().with_max_reentrancy_depth(8);
    let mut proxy = ObservableProxy::new(&mut host, config);
    proxy.on_change("ping", |p, change| {
        let n = change.value.as_i64().unwrap_or(0);
        p.set("pong", json!(n + 1)).map(|_| ())
    });
    proxy.on_change("pong", |p, change| {
        let n = change.value.as_i64().unwrap_or(0);
        p.set("ping", json!(n + 1)).map(|_| ())
    });
    let err = proxy.set("ping", json!(1)).unwrap_err();
    assert!(matches!(err, ProxyError::ReentrantMutation { limit: 8, .. }));
}

// ---------------------------------------------------------------------------
// Dirty tracking, save and load
// ---------------------------------------------------------------------------

#[test]
fn dirty_fields_follow_baseline() {
    let mut host = record(json!({"a": 1, "b": 2}));
    let mut target = record(json!({"a": 0}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    assert!(proxy.dirty_fields().is_empty());

    proxy.set("a", json!(10)).unwrap();
    proxy.set("b", json!(20)).unwrap();
    assert_eq!(proxy.dirty_fields(), vec!["a", "b"]);

    proxy.set("b", json!(2)).unwrap();
    assert_eq!(proxy.dirty_fields(), vec!["a"]);

    proxy.save_to(&mut target).unwrap();
    assert!(proxy.dirty_fields().is_empty());
    assert!(!proxy.is_dirty());

    proxy.set("a", json!(11)).unwrap();
    proxy.reset_dirty(None);
    assert!(proxy.dirty_fields().is_empty());
    drop(proxy);

    assert_eq!(target.get_field_value("a"), json!(10));
    assert!(target.fields().get("b").is_none());
}

#[test]
fn save_writes_back_into_the_host() {
    let mut host = record(json!({"a": 1}));
    {
        let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
        proxy.set("a", json!(2)).unwrap();
        assert_eq!(proxy.host().get_field("a"), Some(json!(1)));
        proxy.save().unwrap();
        assert!(!proxy.is_dirty());
    }
    assert_eq!(host.get_field_value("a"), json!(2));
}

#[test]
fn sync_mode_writes_each_notified_change() {
    let mut host = record(json!({"a": 1, "b": 1}));
    {
        let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default().with_sync(true));
        proxy.set("a", json!(2)).unwrap();
        assert_eq!(proxy.host().get_field("a"), Some(json!(2)));
        proxy.set_with("b", json!(5), false).unwrap();
    }
    assert_eq!(host.get_field_value("a"), json!(2));
    assert_eq!(host.get_field_value("b"), json!(1));
}

fn full_name(scope: &mut ComputeScope<'_>) -> Result<Value, ProxyError> {
    let first: String = scope.get_as("first")?;
    let last: String = scope.get_as("last")?;
    Ok(json!(format!("{first} {last}")))
}

#[test]
fn save_to_writes_computed_values_over_shadowed_fields() {
    let mut host = record(json!({"first": "Alice", "last": "Smith", "full": "", "age": 30}));
    let mut target = record(json!({"first": "Bob", "last": "Jones", "full": "", "age": 40}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy.get("age").unwrap();
    proxy
        .register_computed("full", ["first", "last"], full_name)
        .unwrap();
    proxy
        .register_computed("initials", ["first", "last"], |scope| {
            let first: String = scope.get_as("first")?;
            let last: String = scope.get_as("last")?;
            Ok(json!(format!("{}{}", &first[..1], &last[..1])))
        })
        .unwrap();

    proxy.save_to(&mut target).unwrap();
    assert_eq!(proxy.get("full").unwrap(), json!(""));
    drop(proxy);

    assert_eq!(target.get_field_value("full"), json!("Alice Smith"));
    assert_eq!(target.get_field_value("first"), json!("Alice"));
    assert_eq!(target.get_field_value("age"), json!(30));
    assert!(!target.has_field("initials"));
}

#[test]
fn save_writes_computed_values_back_into_the_host() {
    let mut host = record(json!({"first": "Ada", "last": "Lovelace", "full": ""}));
    {
        let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
        proxy
            .register_computed("full", ["first", "last"], full_name)
            .unwrap();
        proxy.set("first", json!("Grace")).unwrap();
        proxy.save().unwrap();
        assert!(!proxy.is_dirty());
    }
    assert_eq!(host.get_field_value("full"), json!("Grace Lovelace"));
    assert_eq!(host.get_field_value("first"), json!("Grace"));
}

// ---------------------------------------------------------------------------
// Fields, types and paths
// ---------------------------------------------------------------------------

#[test]
fn missing_fields_and_type_conflicts_fail() {
    let mut host = record(json!({"age": 30, "name": "Ada"}));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    assert_eq!(
        proxy.get("nonexistent").unwrap_err(),
        ProxyError::UnknownField { name: "nonexistent".into() }
    );
    assert!(matches!(
        proxy.set("age", json!("thirty")),
        Err(ProxyError::TypeMismatch { .. })
    ));
    assert!(matches!(
        proxy.field("name", ValueType::Sequence),
        Err(ProxyError::TypeMismatch { .. })
    ));
    assert!(matches!(
        proxy.get_as::<i64>("name"),
        Err(ProxyError::TypeMismatch { .. })
    ));
    assert_eq!(proxy.get("age").unwrap(), json!(30));
}

#[test]
fn nested_paths_with_optional_chaining() {
    let mut host = record(json!({
        "habitat": {"location": {"city": "Oslo"}},
        "pet": null,
    }));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());

    assert_eq!(
        proxy.get_path("habitat.location.city").unwrap(),
        Some(json!("Oslo"))
    );
    assert!(proxy.set_path("habitat.location.city", json!("Bergen")).unwrap());
    assert_eq!(
        proxy.get("habitat").unwrap(),
        json!({"location": {"city": "Bergen"}})
    );

    assert_eq!(proxy.get_path("pet?.location?.city").unwrap(), None);
    assert!(!proxy.set_path("pet?.name", json!("Rex")).unwrap());
    assert!(matches!(
        proxy.get_path("habitat.missing"),
        Err(ProxyError::UnknownField { .. })
    ));
}

#[test]
fn untyped_field_turned_into_a_list_emits_collection_events() {
    let mut host = record(json!({"x": null}));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default());
    proxy.set("x", json!([1])).unwrap();
    let field = proxy.field("x", ValueType::Sequence).unwrap();
    assert_eq!(field.kind(), field.cell().kind());

    let sink = Rc::clone(&seen);
    proxy.on_change("x", move |_, change| {
        sink.borrow_mut().push(change.collection.is_some());
        Ok(())
    });
    proxy.push("x", json!(2)).unwrap();
    assert_eq!(*seen.borrow(), vec![true]);
    assert_eq!(proxy.get("x").unwrap(), json!([1, 2]));
}

#[test]
fn path_listeners_fire_when_the_leaf_changes() {
    let mut host = record(json!({
        "habitat": {"name": "Savanna", "location": {"city": "Nairobi"}},
    }));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut proxy = ObservableProxy::new(&mut host, ProxyConfig::default().with_sync(true));
    let sink = Rc::clone(&seen);
    proxy
        .on_path_change("habitat.location.city", move |_, change| {
            assert_eq!(change.field, "habitat.location.city");
            sink.borrow_mut().push((change.value.clone(), change.previous.clone()));
            Ok(())
        })
        .unwrap();

    proxy.set_path("habitat.location.city", json!("Mombasa")).unwrap();
    proxy.set_path("habitat.name", json!("Coast")).unwrap();
    proxy.set("habitat", json!({"name": "Coast"})).unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![
            (json!("Mombasa"), Some(json!("Nairobi"))),
            (json!(null), Some(json!("Mombasa"))),
        ]
    );
    assert_eq!(
        proxy.host().get_field("habitat"),
        Some(json!({"name": "Coast"}))
    );
    assert!(matches!(
        proxy.on_path_change("habitat..city", |_, _| Ok(())),
        Err(ProxyError::InvalidPath { .. })
    ));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Person {
    name: String,
    age: u32,
}

#[test]
fn typed_records_round_trip_through_the_proxy() {
    let mut host = TypedRecord::new(Person {
        name: "Ada".into(),
        age: 36,
    });
    {
        let mut proxy = ObservableProxy::new(&mut host, with_undo());
        proxy.set_value("age", &37).unwrap();
        assert!(matches!(
            proxy.set("age", json!("old")),
            Err(ProxyError::TypeMismatch { .. })
        ));
        assert_eq!(proxy.get_as::<u32>("age").unwrap(), 37);
        proxy.save().unwrap();
    }
    assert_eq!(host.inner().age, 37);
}

/// Small helper so assertions on records read cleanly.
trait FieldValue {
    fn get_field_value(&self, name: &str) -> Value;
}

impl FieldValue for JsonRecord {
    fn get_field_value(&self, name: &str) -> Value {
        self.fields().get(name).cloned().unwrap_or(Value::Null)
    }
}

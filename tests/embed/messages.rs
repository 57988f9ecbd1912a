//! Message records and lists driven through a live interpreter.

use perch::{BridgeError, DiagnosticKind, Message, MessageList, Value};

use super::{interp_lock, ready_interp};

#[test]
fn test_list_round_trip_through_the_bridge() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let scope = interp.engine().heap().open_scope();
    let list = MessageList::create(interp.engine_mut(), &scope).unwrap();
    assert_eq!(list.size(interp.engine_mut(), &scope).unwrap(), 0);

    for id in [100, 101, 102] {
        let m = Message::new(interp.engine_mut(), id);
        m.set_field(interp.engine_mut(), "sender", Value::from("alice"));
        m.set_field(interp.engine_mut(), "kind", Value::from("zephyr"));
        list.add(interp.engine_mut(), &scope, &m).unwrap();
    }
    assert_eq!(list.size(interp.engine_mut(), &scope).unwrap(), 3);

    let found = list
        .get_by_id(interp.engine_mut(), &scope, 101)
        .unwrap()
        .unwrap();
    assert_eq!(found.id(), Some(101));
    assert_eq!(found.field("sender"), Some(Value::from("alice")));
    assert!(list
        .get_by_id(interp.engine_mut(), &scope, 999)
        .unwrap()
        .is_none());
}

#[test]
fn test_delete_marks_and_expunge_removes() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let scope = interp.engine().heap().open_scope();
    let list = MessageList::create(interp.engine_mut(), &scope).unwrap();
    for id in [1, 2, 3] {
        let m = Message::new(interp.engine_mut(), id);
        list.add(interp.engine_mut(), &scope, &m).unwrap();
    }

    assert!(list.delete_by_id(interp.engine_mut(), &scope, 2).unwrap());
    let marked = list
        .get_by_id(interp.engine_mut(), &scope, 2)
        .unwrap()
        .unwrap();
    assert!(marked.is_deleted());
    assert_eq!(list.size(interp.engine_mut(), &scope).unwrap(), 3);

    assert_eq!(list.expunge(interp.engine_mut(), &scope).unwrap(), 1);
    assert_eq!(list.size(interp.engine_mut(), &scope).unwrap(), 2);
    assert!(list
        .get_by_id(interp.engine_mut(), &scope, 2)
        .unwrap()
        .is_none());
}

#[test]
fn test_iteration_through_the_class_protocol() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let scope = interp.engine().heap().open_scope();
    let list = MessageList::create(interp.engine_mut(), &scope).unwrap();
    for id in [10, 20, 30] {
        let m = Message::new(interp.engine_mut(), id);
        list.add(interp.engine_mut(), &scope, &m).unwrap();
    }

    list.iterate_begin(interp.engine_mut(), &scope, 0, false)
        .unwrap();
    let mut forward = Vec::new();
    while let Some(m) = list.iterate_next(interp.engine_mut(), &scope).unwrap() {
        forward.push(m.id().unwrap_or(-1));
    }
    list.iterate_done(interp.engine_mut(), &scope).unwrap();
    assert_eq!(forward, vec![10, 20, 30]);

    list.iterate_begin(interp.engine_mut(), &scope, 2, true)
        .unwrap();
    let mut backward = Vec::new();
    while let Some(m) = list.iterate_next(interp.engine_mut(), &scope).unwrap() {
        backward.push(m.id().unwrap_or(-1));
    }
    list.iterate_done(interp.engine_mut(), &scope).unwrap();
    assert_eq!(backward, vec![30, 20, 10]);
}

#[test]
fn test_method_errors_surface_through_the_gate() {
    let _guard = interp_lock();
    let (mut interp, sink, _dir) = ready_interp();
    let scope = interp.engine().heap().open_scope();
    let list = MessageList::create(interp.engine_mut(), &scope).unwrap();
    let recv = Value::Obj(list.handle().clone());

    let before = sink.count(DiagnosticKind::ScriptError);
    let err = interp
        .call_method_void(&scope, &recv, "add_message", &[Value::from("not a message")])
        .unwrap_err();
    assert!(matches!(err, BridgeError::Script { .. }));
    assert_eq!(sink.count(DiagnosticKind::ScriptError), before + 1);
    assert!(!interp.engine().has_error());
    assert_eq!(list.size(interp.engine_mut(), &scope).unwrap(), 0);
}

#[test]
fn test_messages_outlive_the_construction_scope() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let baseline = interp.engine().heap().live();
    let message = {
        let _scope = interp.engine().heap().open_scope();
        Message::new(interp.engine_mut(), 5)
    };
    // Retained: the record survives the scope it was built under.
    assert_eq!(message.id(), Some(5));
    assert_eq!(interp.engine().heap().live(), baseline + 1);
    drop(message);
    assert_eq!(interp.engine().heap().live(), baseline);
}

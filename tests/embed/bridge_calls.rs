//! The gated bridge surface: marshaling laws, the error protocol, and the
//! one-result contract, exercised end to end through an interpreter.

use perch::{BridgeError, DiagnosticKind, ObjKind, ScriptError, Value};
use serde_json::json;
use std::rc::Rc;

use super::{interp_lock, ready_interp};

#[test]
fn test_json_sequence_survives_with_order_and_length() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    interp.engine_mut().register_fn("echo", Some(1), |_, args| {
        Ok(args.first().cloned().unwrap_or(Value::Null))
    });
    let scope = interp.engine().heap().open_scope();
    let input = json!([3, 1, 2, "x", [true, null]]);
    let out = interp.call_json(&scope, "echo", &[input.clone()]).unwrap();
    assert_eq!(out, input);
    assert_eq!(out.as_array().unwrap().len(), 5);
}

#[test]
fn test_json_mapping_survives_with_exact_key_set() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    interp.engine_mut().register_fn("echo", Some(1), |_, args| {
        Ok(args.first().cloned().unwrap_or(Value::Null))
    });
    let scope = interp.engine().heap().open_scope();
    let input = json!({"id": 4, "kind": "note", "sender": "alice", "body": ""});
    let out = interp.call_json(&scope, "echo", &[input.clone()]).unwrap();
    assert_eq!(out, input);
    assert_eq!(out.as_object().unwrap().len(), 4);
}

#[test]
fn test_invalid_text_becomes_lossy_with_one_diagnostic() {
    let _guard = interp_lock();
    let (interp, sink, _dir) = ready_interp();
    let text = interp.engine().text_from_bytes(b"abc\xffdef");
    assert_eq!(text.as_str(), "abc\u{FFFD}def");
    assert_eq!(sink.count(DiagnosticKind::InvalidText), 1);
    let entries = sink.entries();
    let (_, message) = entries
        .iter()
        .find(|(k, _)| *k == DiagnosticKind::InvalidText)
        .unwrap();
    assert!(message.contains("\\xff"), "escaped bytes in {message:?}");

    // Several bad bytes in one conversion still report once.
    let _ = interp.engine().text_from_bytes(b"\xff\xfe\xfd");
    assert_eq!(sink.count(DiagnosticKind::InvalidText), 2);
}

#[test]
fn test_valid_text_reports_nothing() {
    let _guard = interp_lock();
    let (interp, sink, _dir) = ready_interp();
    let text = interp.engine().text_from_bytes("héllo".as_bytes());
    assert_eq!(text.as_str(), "héllo");
    assert_eq!(sink.count(DiagnosticKind::InvalidText), 0);
}

#[test]
fn test_non_finite_floats_marshal_to_null() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    interp
        .engine_mut()
        .register_fn("nan", Some(0), |_, _| Ok(Value::Float(f64::NAN)));
    interp
        .engine_mut()
        .register_fn("inf", Some(0), |_, _| Ok(Value::Float(f64::INFINITY)));
    let scope = interp.engine().heap().open_scope();
    assert_eq!(interp.call_json(&scope, "nan", &[]).unwrap(), json!(null));
    assert_eq!(interp.call_json(&scope, "inf", &[]).unwrap(), json!(null));
}

#[test]
fn test_circular_structure_is_a_marshal_error() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    interp.engine_mut().register_fn("make_cycle", Some(0), |engine, _| {
        let h = engine.heap().alloc(ObjKind::List(Vec::new()));
        let self_ref = Value::Obj(h.clone());
        if let Some(items) = h.borrow_mut().as_list_mut() {
            items.push(self_ref);
        }
        Ok(Value::Obj(h))
    });
    let scope = interp.engine().heap().open_scope();
    let err = interp.call_json(&scope, "make_cycle", &[]).unwrap_err();
    match err {
        BridgeError::Marshal { message } => assert!(message.contains("circular")),
        other => panic!("expected marshal error, got {other:?}"),
    }
}

#[test]
fn test_script_error_yields_no_value_one_diagnostic_clear_slot() {
    let _guard = interp_lock();
    let (mut interp, sink, _dir) = ready_interp();
    interp
        .engine_mut()
        .register_fn("explode", Some(0), |_, _| Err(ScriptError::runtime("boom")));
    let scope = interp.engine().heap().open_scope();

    let before = sink.count(DiagnosticKind::ScriptError);
    let err = interp.call_function(&scope, "explode", &[]).unwrap_err();
    assert_eq!(
        err,
        BridgeError::Script {
            message: "runtime error: boom".to_owned()
        }
    );
    assert_eq!(sink.count(DiagnosticKind::ScriptError), before + 1);
    assert!(!interp.engine().has_error());

    // The failure leaves no residue for the next call.
    let out = interp.call_function(&scope, "host.version", &[]).unwrap();
    assert!(matches!(out, Value::Str(_)));
    assert_eq!(sink.count(DiagnosticKind::ScriptError), before + 1);
}

#[test]
#[should_panic(expected = "result contract violation")]
fn test_zero_results_from_value_call_is_fatal() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    interp
        .engine_mut()
        .register_raw_fn("silent", Some(0), Rc::new(|_, _| Ok(Vec::new())));
    let scope = interp.engine().heap().open_scope();
    let _ = interp.call_function(&scope, "silent", &[]);
}

#[test]
fn test_void_call_tolerates_any_result_count() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    interp
        .engine_mut()
        .register_raw_fn("silent", Some(0), Rc::new(|_, _| Ok(Vec::new())));
    let scope = interp.engine().heap().open_scope();
    interp.call_function_void(&scope, "silent", &[]).unwrap();
}

#[test]
fn test_call_hook_reports_presence() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let scope = interp.engine().heap().open_scope();
    assert!(!interp
        .call_hook(&scope, "hooks.receive_message", &[Value::Int(1)])
        .unwrap());

    let seen = Rc::new(std::cell::Cell::new(0));
    let counter = seen.clone();
    interp
        .engine_mut()
        .register_fn("hooks.receive_message", Some(1), move |_, _| {
            counter.set(counter.get() + 1);
            Ok(Value::Null)
        });
    assert!(interp
        .call_hook(&scope, "hooks.receive_message", &[Value::Int(1)])
        .unwrap());
    assert_eq!(seen.get(), 1);
}

#[test]
fn test_is_function_probes_the_registry() {
    let _guard = interp_lock();
    let (interp, _sink, _dir) = ready_interp();
    assert!(interp.is_function("host.version"));
    assert!(!interp.is_function("no_such_function"));
}

#[test]
fn test_new_instance_through_the_gate() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let scope = interp.engine().heap().open_scope();
    let handle = interp.new_instance(&scope, "message_list", &[]).unwrap();
    assert_eq!(
        handle.borrow().record_class().map(|c| c.as_str().to_owned()),
        Some("message_list".to_owned())
    );
}

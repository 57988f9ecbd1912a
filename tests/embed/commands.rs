//! Command registry dispatch and the new-command announcement hook.

use std::cell::RefCell;
use std::rc::Rc;

use perch::{
    BridgeError, CommandError, CommandRegistry, DiagnosticKind, Interp, ScriptCallable,
    ScriptError, TextCallback, Value,
};

use super::{config_for, interp_lock, lib_dir_with_kernel, ready_interp, PLAIN_KERNEL};

#[test]
fn test_native_command_executes() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let scope = interp.engine().heap().open_scope();
    let mut registry = CommandRegistry::new();
    registry.register_native("echo-args", "repeat the arguments", |_, args| {
        Some(args.join(" "))
    });
    let out = registry
        .execute(&mut interp, &scope, "echo-args", &["zwrite", "-c", "help"])
        .unwrap();
    assert_eq!(out, Some("zwrite -c help".to_owned()));
}

#[test]
fn test_script_command_output_follows_truthiness() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let scope = interp.engine().heap().open_scope();
    let mut registry = CommandRegistry::new();

    let callable = ScriptCallable::wrap(interp.engine_mut(), "first_or_null", None, |_, args| {
        Ok(args.first().cloned().unwrap_or(Value::Null))
    });
    registry.register_script(&mut interp, &scope, "first", "echo the first argument", callable);

    let out = registry
        .execute(&mut interp, &scope, "first", &["shown"])
        .unwrap();
    assert_eq!(out, Some("shown".to_owned()));

    // A null result means nothing to display.
    let out = registry.execute(&mut interp, &scope, "first", &[]).unwrap();
    assert_eq!(out, None);
}

#[test]
fn test_register_script_announces_through_the_hook() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let scope = interp.engine().heap().open_scope();

    let announced = Rc::new(RefCell::new(Vec::new()));
    let log = announced.clone();
    interp
        .engine_mut()
        .register_fn("hooks.new_command", Some(1), move |_, args| {
            log.borrow_mut()
                .push(args.first().map(Value::to_text).unwrap_or_default());
            Ok(Value::Null)
        });

    let mut registry = CommandRegistry::new();
    let callable = ScriptCallable::wrap(interp.engine_mut(), "noop", None, |_, _| Ok(Value::Null));
    registry.register_script(&mut interp, &scope, "zlocate", "find a user", callable);

    assert_eq!(*announced.borrow(), vec!["zlocate".to_owned()]);
    assert!(registry.contains("zlocate"));
}

#[test]
fn test_registration_before_bootstrap_skips_the_announcement() {
    let _guard = interp_lock();
    let dir = lib_dir_with_kernel(PLAIN_KERNEL);
    let mut interp = Interp::construct(config_for(&dir)).unwrap();
    let scope = interp.engine().heap().open_scope();

    let announced = Rc::new(RefCell::new(Vec::new()));
    let log = announced.clone();
    interp
        .engine_mut()
        .register_fn("hooks.new_command", Some(1), move |_, args| {
            log.borrow_mut()
                .push(args.first().map(Value::to_text).unwrap_or_default());
            Ok(Value::Null)
        });

    let mut registry = CommandRegistry::new();
    let callable = ScriptCallable::wrap(interp.engine_mut(), "noop", None, |_, _| Ok(Value::Null));
    registry.register_script(&mut interp, &scope, "early", "registered pre-config", callable);

    assert!(announced.borrow().is_empty());
    assert!(registry.contains("early"));
}

#[test]
fn test_unknown_command_is_an_error() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let scope = interp.engine().heap().open_scope();
    let registry = CommandRegistry::new();
    let err = registry
        .execute(&mut interp, &scope, "zephyr", &[])
        .unwrap_err();
    assert_eq!(err, CommandError::Unknown("zephyr".to_owned()));
}

#[test]
fn test_script_command_failure_propagates() {
    let _guard = interp_lock();
    let (mut interp, sink, _dir) = ready_interp();
    let scope = interp.engine().heap().open_scope();
    let mut registry = CommandRegistry::new();
    let callable = ScriptCallable::wrap(interp.engine_mut(), "bad", None, |_, _| {
        Err(ScriptError::runtime("command blew up"))
    });
    registry.register_script(&mut interp, &scope, "bad", "always fails", callable);

    let before = sink.count(DiagnosticKind::ScriptError);
    let err = registry
        .execute(&mut interp, &scope, "bad", &[])
        .unwrap_err();
    assert!(matches!(err, CommandError::Bridge(BridgeError::Script { .. })));
    assert_eq!(sink.count(DiagnosticKind::ScriptError), before + 1);
}

#[test]
fn test_text_callback_runs_once_and_releases_its_callable() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let scope = interp.engine().heap().open_scope();
    let baseline = interp.engine().heap().live();

    let received = Rc::new(RefCell::new(Vec::new()));
    let log = received.clone();
    let callable = ScriptCallable::wrap(interp.engine_mut(), "on_line", None, move |_, args| {
        log.borrow_mut()
            .push(args.first().map(Value::to_text).unwrap_or_default());
        Ok(Value::Null)
    });
    assert_eq!(interp.engine().heap().live(), baseline + 1);

    let prompt = TextCallback::new(callable);
    prompt.invoke(&mut interp, &scope, "typed input").unwrap();
    assert_eq!(*received.borrow(), vec!["typed input".to_owned()]);
    // Consumed: the callable's retention is gone with it.
    assert_eq!(interp.engine().heap().live(), baseline);
}

#[test]
fn test_dropped_text_callback_releases_without_running() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let baseline = interp.engine().heap().live();
    let callable =
        ScriptCallable::wrap(interp.engine_mut(), "never", None, |_, _| Ok(Value::Null));
    let prompt = TextCallback::new(callable);
    assert_eq!(interp.engine().heap().live(), baseline + 1);
    drop(prompt);
    assert_eq!(interp.engine().heap().live(), baseline);
}

//! Message records and the script-visible `message_list` class.
//!
//! A message is a record with a fixed set of fields (see
//! [`MESSAGE_FIELDS`](crate::host::MESSAGE_FIELDS)) plus a `deleted` mark.
//! The list model owns an ordered sequence of message records and exposes
//! size, id lookup, append, deletion marking, expunge, and a positional
//! iteration protocol. The host-side [`MessageList`] wrapper drives every
//! operation through the Call Bridge, the same path external callers use.

use crate::bridge;
use crate::engine::Engine;
use crate::error::{BridgeError, ScriptError};
use crate::heap::{Handle, Scope};
use crate::host::MESSAGE_FIELDS;
use crate::prelude::*;
use crate::value::{CheapClone, ObjKind, Value};

const MESSAGE_CLASS: &str = "message";
const LIST_CLASS: &str = "message_list";

// ============================================================================
// Host-side wrappers
// ============================================================================

/// A retained message record.
#[derive(Debug, Clone)]
pub struct Message {
    handle: Handle,
}

impl Message {
    /// Allocate a retained message with all standard fields null, the
    /// given id, and the `deleted` mark off.
    pub fn new(engine: &mut Engine, id: i64) -> Self {
        let class = engine.intern(MESSAGE_CLASS);
        let mut fields = index_map_with_capacity(MESSAGE_FIELDS.len() + 1);
        for name in MESSAGE_FIELDS {
            fields.insert(engine.intern(name), Value::Null);
        }
        fields.insert(engine.intern("id"), Value::Int(id));
        fields.insert(engine.intern("deleted"), Value::Bool(false));
        let handle = engine.heap().alloc(ObjKind::Record { class, fields });
        Message { handle }
    }

    /// Wrap an existing record if it carries the message class tag.
    pub fn from_handle(handle: Handle) -> Option<Self> {
        let is_message = handle
            .borrow()
            .record_class()
            .is_some_and(|c| c.as_str() == MESSAGE_CLASS);
        is_message.then_some(Message { handle })
    }

    pub fn set_field(&self, engine: &mut Engine, name: &str, value: Value) {
        set_record_field(engine, &self.handle, name, value);
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.handle.borrow().field(name).map(Value::cheap_clone)
    }

    pub fn id(&self) -> Option<i64> {
        self.field("id").and_then(|v| v.as_int())
    }

    pub fn is_deleted(&self) -> bool {
        self.field("deleted").is_some_and(|v| v.truthy())
    }

    /// Mark for removal; the list drops it on the next expunge.
    pub fn mark_deleted(&self, engine: &mut Engine) {
        self.set_field(engine, "deleted", Value::Bool(true));
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn as_value(&self) -> Value {
        Value::Obj(self.handle.cheap_clone())
    }
}

impl CheapClone for Message {}

/// A retained handle on a script-visible message list instance.
#[derive(Debug)]
pub struct MessageList {
    instance: Handle,
}

impl MessageList {
    /// Construct a fresh list through the class constructor.
    pub fn create(engine: &mut Engine, scope: &Scope) -> Result<Self, BridgeError> {
        let instance = bridge::new_instance(engine, scope, LIST_CLASS, &[])?;
        Ok(MessageList { instance })
    }

    fn recv(&self) -> Value {
        Value::Obj(self.instance.cheap_clone())
    }

    pub fn size(&self, engine: &mut Engine, scope: &Scope) -> Result<usize, BridgeError> {
        let v = bridge::call_method(engine, scope, &self.recv(), "get_size", &[])?;
        Ok(v.as_int().unwrap_or(0).max(0) as usize)
    }

    pub fn add(
        &self,
        engine: &mut Engine,
        scope: &Scope,
        message: &Message,
    ) -> Result<(), BridgeError> {
        bridge::call_method_void(
            engine,
            scope,
            &self.recv(),
            "add_message",
            &[message.as_value()],
        )
    }

    pub fn get_by_id(
        &self,
        engine: &mut Engine,
        scope: &Scope,
        id: i64,
    ) -> Result<Option<Message>, BridgeError> {
        let v = bridge::call_method(engine, scope, &self.recv(), "get_by_id", &[Value::Int(id)])?;
        Ok(v.as_obj().and_then(|h| Message::from_handle(h.cheap_clone())))
    }

    /// Mark the message with `id` deleted. `Ok(false)` if no such id.
    pub fn delete_by_id(
        &self,
        engine: &mut Engine,
        scope: &Scope,
        id: i64,
    ) -> Result<bool, BridgeError> {
        let v =
            bridge::call_method(engine, scope, &self.recv(), "delete_by_id", &[Value::Int(id)])?;
        Ok(v.truthy())
    }

    /// Drop every message marked deleted; returns how many went.
    pub fn expunge(&self, engine: &mut Engine, scope: &Scope) -> Result<i64, BridgeError> {
        let v = bridge::call_method(engine, scope, &self.recv(), "expunge", &[])?;
        Ok(v.as_int().unwrap_or(0))
    }

    pub fn iterate_begin(
        &self,
        engine: &mut Engine,
        scope: &Scope,
        pos: i64,
        reverse: bool,
    ) -> Result<(), BridgeError> {
        bridge::call_method_void(
            engine,
            scope,
            &self.recv(),
            "iterate_begin",
            &[Value::Int(pos), Value::Bool(reverse)],
        )
    }

    pub fn iterate_next(
        &self,
        engine: &mut Engine,
        scope: &Scope,
    ) -> Result<Option<Message>, BridgeError> {
        let v = bridge::call_method(engine, scope, &self.recv(), "iterate_next", &[])?;
        Ok(v.as_obj().and_then(|h| Message::from_handle(h.cheap_clone())))
    }

    pub fn iterate_done(&self, engine: &mut Engine, scope: &Scope) -> Result<(), BridgeError> {
        bridge::call_method_void(engine, scope, &self.recv(), "iterate_done", &[])
    }

    pub fn handle(&self) -> &Handle {
        &self.instance
    }
}

// ============================================================================
// Class installation
// ============================================================================

fn recv_handle(args: &[Value]) -> Result<Handle, ScriptError> {
    match args.first() {
        Some(Value::Obj(h))
            if h.borrow()
                .record_class()
                .is_some_and(|c| c.as_str() == LIST_CLASS) =>
        {
            Ok(h.cheap_clone())
        }
        _ => Err(ScriptError::runtime("receiver is not a message_list")),
    }
}

fn items_of(recv: &Handle) -> Result<Handle, ScriptError> {
    recv.borrow()
        .field("items")
        .and_then(Value::as_obj)
        .map(Handle::cheap_clone)
        .ok_or_else(|| ScriptError::runtime("message_list has no items"))
}

fn set_record_field(engine: &mut Engine, recv: &Handle, name: &str, value: Value) {
    let key = engine.intern(name);
    if let ObjKind::Record { fields, .. } = &mut recv.borrow_mut().kind {
        fields.insert(key, value);
    }
}

fn items_list_err() -> ScriptError {
    ScriptError::runtime("message_list items is not a list")
}

/// Register the `message` and `message_list` classes.
pub fn install(engine: &mut Engine) {
    engine.register_class(MESSAGE_CLASS);
    engine.register_class(LIST_CLASS);

    engine.register_method(LIST_CLASS, "new", Some(1), |engine, _| {
        let items = engine.heap().alloc(ObjKind::List(Vec::new()));
        let class = engine.intern(LIST_CLASS);
        let mut fields = index_map_with_capacity(4);
        fields.insert(engine.intern("items"), Value::Obj(items));
        fields.insert(engine.intern("iter_pos"), Value::Int(0));
        fields.insert(engine.intern("iter_reverse"), Value::Bool(false));
        fields.insert(engine.intern("iter_active"), Value::Bool(false));
        let record = engine.heap().alloc(ObjKind::Record { class, fields });
        Ok(Value::Obj(record))
    });

    engine.register_method(LIST_CLASS, "get_size", Some(1), |_, args| {
        let recv = recv_handle(args)?;
        let items = items_of(&recv)?;
        let len = items.borrow().as_list().map(Vec::len).ok_or_else(items_list_err)?;
        Ok(Value::Int(len as i64))
    });

    engine.register_method(LIST_CLASS, "add_message", Some(2), |_, args| {
        let recv = recv_handle(args)?;
        let message = match args.get(1) {
            Some(Value::Obj(h))
                if h.borrow()
                    .record_class()
                    .is_some_and(|c| c.as_str() == MESSAGE_CLASS) =>
            {
                h.cheap_clone()
            }
            _ => return Err(ScriptError::runtime("add_message takes a message record")),
        };
        let items = items_of(&recv)?;
        items
            .borrow_mut()
            .as_list_mut()
            .ok_or_else(items_list_err)?
            .push(Value::Obj(message));
        Ok(Value::Null)
    });

    engine.register_method(LIST_CLASS, "get_by_id", Some(2), |_, args| {
        let recv = recv_handle(args)?;
        let want = args.get(1).cloned().unwrap_or(Value::Null);
        let items = items_of(&recv)?;
        let body = items.borrow();
        let list = body.as_list().ok_or_else(items_list_err)?;
        for v in list {
            if let Some(h) = v.as_obj() {
                if h.borrow().field("id") == Some(&want) {
                    return Ok(v.cheap_clone());
                }
            }
        }
        Ok(Value::Null)
    });

    engine.register_method(LIST_CLASS, "delete_by_id", Some(2), |engine, args| {
        let recv = recv_handle(args)?;
        let want = args.get(1).cloned().unwrap_or(Value::Null);
        let items = items_of(&recv)?;
        let found = {
            let body = items.borrow();
            let list = body.as_list().ok_or_else(items_list_err)?;
            list.iter()
                .filter_map(Value::as_obj)
                .find(|h| h.borrow().field("id") == Some(&want))
                .map(Handle::cheap_clone)
        };
        match found {
            Some(message) => {
                set_record_field(engine, &message, "deleted", Value::Bool(true));
                Ok(Value::Bool(true))
            }
            None => Ok(Value::Bool(false)),
        }
    });

    engine.register_method(LIST_CLASS, "expunge", Some(1), |_, args| {
        let recv = recv_handle(args)?;
        let items = items_of(&recv)?;
        let mut body = items.borrow_mut();
        let list = body.as_list_mut().ok_or_else(items_list_err)?;
        let before = list.len();
        list.retain(|v| {
            !v.as_obj()
                .is_some_and(|h| h.borrow().field("deleted").is_some_and(Value::truthy))
        });
        Ok(Value::Int((before - list.len()) as i64))
    });

    engine.register_method(LIST_CLASS, "iterate_begin", Some(3), |engine, args| {
        let recv = recv_handle(args)?;
        let pos = args.get(1).and_then(Value::as_int).unwrap_or(0);
        let reverse = args.get(2).map(Value::truthy).unwrap_or(false);
        set_record_field(engine, &recv, "iter_pos", Value::Int(pos));
        set_record_field(engine, &recv, "iter_reverse", Value::Bool(reverse));
        set_record_field(engine, &recv, "iter_active", Value::Bool(true));
        Ok(Value::Null)
    });

    engine.register_method(LIST_CLASS, "iterate_next", Some(1), |engine, args| {
        let recv = recv_handle(args)?;
        let (active, pos, reverse) = {
            let body = recv.borrow();
            (
                body.field("iter_active").is_some_and(Value::truthy),
                body.field("iter_pos").and_then(Value::as_int).unwrap_or(0),
                body.field("iter_reverse").is_some_and(Value::truthy),
            )
        };
        if !active {
            return Err(ScriptError::runtime("iterate_next before iterate_begin"));
        }
        let items = items_of(&recv)?;
        let item = {
            let body = items.borrow();
            let list = body.as_list().ok_or_else(items_list_err)?;
            if pos < 0 {
                None
            } else {
                list.get(pos as usize).map(Value::cheap_clone)
            }
        };
        match item {
            None => Ok(Value::Null),
            Some(item) => {
                let next = if reverse { pos - 1 } else { pos + 1 };
                set_record_field(engine, &recv, "iter_pos", Value::Int(next));
                Ok(item)
            }
        }
    });

    engine.register_method(LIST_CLASS, "iterate_done", Some(1), |engine, args| {
        let recv = recv_handle(args)?;
        set_record_field(engine, &recv, "iter_active", Value::Bool(false));
        Ok(Value::Null)
    });
}

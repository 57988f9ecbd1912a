//! The command registry: named operations dispatched by an embedder's
//! input layer, backed by native closures or retained script callables.
//!
//! Script-backed commands follow the output gate convention: the
//! callable's result is shown only when it is truthy, so a handler that
//! returns null or an empty string runs silently.

use crate::bridge::ScriptCallable;
use crate::error::CommandError;
use crate::heap::Scope;
use crate::host::Interp;
use crate::prelude::*;
use crate::value::Value;

/// Handler behind a command.
pub enum CommandKind {
    /// Host-native handler; returns the text to display, if any.
    Native(Rc<dyn Fn(&mut Interp, &[&str]) -> Option<String>>),
    /// Retained script callable; arguments arrive as string values.
    Script(ScriptCallable),
}

impl fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Native(_) => f.write_str("Native"),
            CommandKind::Script(_) => f.write_str("Script"),
        }
    }
}

#[derive(Debug)]
pub struct Command {
    name: String,
    summary: String,
    kind: CommandKind,
}

impl Command {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }
}

/// Name-keyed command table. Registering a name again replaces the old
/// handler; replacing a script command releases its callable.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: FxHashMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_native<F>(&mut self, name: &str, summary: &str, func: F)
    where
        F: Fn(&mut Interp, &[&str]) -> Option<String> + 'static,
    {
        self.commands.insert(
            name.to_owned(),
            Command {
                name: name.to_owned(),
                summary: summary.to_owned(),
                kind: CommandKind::Native(Rc::new(func)),
            },
        );
    }

    /// Register a script-backed command and announce it through the
    /// `hooks.new_command` hook. Announcement failures are already
    /// reported through the diagnostic sink and do not block
    /// registration.
    pub fn register_script(
        &mut self,
        interp: &mut Interp,
        scope: &Scope,
        name: &str,
        summary: &str,
        callable: ScriptCallable,
    ) {
        if interp.have_config() {
            let _ = interp.call_function_void(scope, "hooks.new_command", &[Value::from(name)]);
        }
        self.commands.insert(
            name.to_owned(),
            Command {
                name: name.to_owned(),
                summary: summary.to_owned(),
                kind: CommandKind::Script(callable),
            },
        );
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.commands.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// Command names in sorted order, for help listings.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Dispatch `name`. Returns the text the command wants displayed, if
    /// any.
    pub fn execute(
        &self,
        interp: &mut Interp,
        scope: &Scope,
        name: &str,
        args: &[&str],
    ) -> Result<Option<String>, CommandError> {
        let command = self
            .commands
            .get(name)
            .ok_or_else(|| CommandError::Unknown(name.to_owned()))?;
        match &command.kind {
            CommandKind::Native(func) => Ok(func(interp, args)),
            CommandKind::Script(callable) => {
                let values: Vec<Value> = args.iter().map(|a| Value::from(*a)).collect();
                let out = interp.invoke_callable(scope, callable, &values)?;
                if out.truthy() {
                    Ok(Some(out.to_text()))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// A one-shot text callback, used for prompt-style input.
///
/// Invoking consumes the value; the underlying callable's retention is
/// released when the invocation returns. Dropping without invoking (a
/// cancelled prompt) releases it the same way.
#[derive(Debug)]
pub struct TextCallback {
    callable: ScriptCallable,
}

impl TextCallback {
    pub fn new(callable: ScriptCallable) -> Self {
        TextCallback { callable }
    }

    pub fn invoke(
        self,
        interp: &mut Interp,
        scope: &Scope,
        text: &str,
    ) -> Result<(), CommandError> {
        interp.invoke_callable_void(scope, &self.callable, &[Value::from(text)])?;
        Ok(())
    }
}

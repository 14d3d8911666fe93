//! Instance state: everything one running (or suspended) script carries —
//! the operand stack, the activation stack, the scope stack, the
//! check-handler stack, the program counter, and the termination/wait
//! state. Kept as plain contiguous arrays sized at creation time so the
//! fetch-execute loop never allocates, and so an [`crate::factory::InstanceFactory`]
//! can reset and reuse one across repeated invocations.

use std::collections::HashMap;

use crate::limits::VmLimits;
use crate::value::{MapKey, Value};

/// A local variable scope, created on `CALL` and destroyed on `RETURN`.
/// Names resolve in the topmost scope only — there is no lexical lookup up
/// the stack.
#[derive(Debug, Default)]
pub struct Scope(HashMap<MapKey, Value>);

impl Scope {
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        self.0.get(&MapKey::new(name)).cloned().unwrap_or(Value::Null)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(MapKey::new(name.into()), value);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// A pushed call frame: where to resume the caller, and the sentinel depth
/// that marks "return here ends the whole invocation."
#[derive(Debug, Clone, Copy)]
pub struct ActivationFrame {
    pub return_index: Option<usize>,
}

/// A snapshot of the operand- and scope-stack depths taken at `PUSH_CHECK`,
/// restored at the matching `POP_CHECK`.
#[derive(Debug, Clone, Copy)]
pub struct CheckFrame {
    pub operand_depth: usize,
    pub scope_depth: usize,
}

/// A host-registered resource (file handle, stream, …) the instance will
/// close automatically on termination unless the host calls
/// [`Instance::do_not_close`] first.
pub trait Closeable {
    fn close(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitState {
    Running,
    Terminated,
    Waiting { wait_type: String, wait_parameter: Option<Box<ValueKey>> },
}

/// A cheaply comparable stand-in for a wait parameter. Most hosts pass a
/// simple scalar; this avoids requiring `Value` (which is not `Eq`) to be
/// compared in `WaitState`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKey {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
}

pub struct Instance {
    pub operand_stack: Vec<Value>,
    pub activations: Vec<ActivationFrame>,
    pub scopes: Vec<Scope>,
    pub check_frames: Vec<CheckFrame>,
    pub command_index: usize,
    pub state: WaitState,
    pub wait_value: Option<Value>,
    pub instructions_executed: u64,
    pub limits: VmLimits,
    closeables: Vec<Box<dyn Closeable>>,
}

impl Instance {
    #[must_use]
    pub fn new(limits: VmLimits) -> Self {
        Self {
            operand_stack: Vec::with_capacity(limits.operand_stack_capacity),
            activations: Vec::with_capacity(limits.activation_stack_capacity),
            scopes: Vec::with_capacity(limits.activation_stack_capacity),
            check_frames: Vec::new(),
            command_index: 0,
            state: WaitState::Running,
            wait_value: None,
            instructions_executed: 0,
            limits,
            closeables: Vec::new(),
        }
    }

    /// Resets all stacks to empty (retaining their backing allocation) and
    /// clears execution state, so this instance can be handed back to an
    /// [`crate::factory::InstanceFactory`] and reused for another invocation.
    pub fn reset(&mut self) {
        self.operand_stack.clear();
        self.activations.clear();
        self.scopes.clear();
        self.check_frames.clear();
        self.command_index = 0;
        self.state = WaitState::Running;
        self.wait_value = None;
        self.instructions_executed = 0;
        for mut c in self.closeables.drain(..) {
            c.close();
        }
    }

    pub fn push(&mut self, v: Value) {
        self.operand_stack.push(v);
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.operand_stack.pop()
    }

    #[must_use]
    pub fn peek(&self) -> Option<&Value> {
        self.operand_stack.last()
    }

    #[must_use]
    pub fn current_scope(&self) -> &Scope {
        self.scopes.last().expect("scope stack must not be empty while running")
    }

    pub fn current_scope_mut(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("scope stack must not be empty while running")
    }

    pub fn register_closeable(&mut self, handle: Box<dyn Closeable>) -> usize {
        self.closeables.push(handle);
        self.closeables.len() - 1
    }

    /// Removes a previously registered handle from the close-on-termination
    /// set, so the host retains ownership of it (`§5`: `doNotClose`).
    pub fn do_not_close(&mut self, index: usize) -> Option<Box<dyn Closeable>> {
        if index < self.closeables.len() {
            Some(self.closeables.remove(index))
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, WaitState::Terminated)
    }

    #[must_use]
    pub fn is_waiting(&self) -> bool {
        matches!(self.state, WaitState::Waiting { .. })
    }

    pub fn wait(&mut self, wait_type: impl Into<String>, parameter: Option<Value>) {
        let key = parameter.as_ref().and_then(value_key);
        self.wait_value = parameter;
        self.state = WaitState::Waiting {
            wait_type: wait_type.into(),
            wait_parameter: key.map(Box::new),
        };
    }

    pub fn resume(&mut self) {
        self.state = WaitState::Running;
    }

    pub fn terminate(&mut self) {
        self.state = WaitState::Terminated;
        for mut c in self.closeables.drain(..) {
            c.close();
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        for mut c in self.closeables.drain(..) {
            c.close();
        }
    }
}

fn value_key(v: &Value) -> Option<ValueKey> {
    Some(match v {
        Value::Null => ValueKey::Null,
        Value::Bool(b) => ValueKey::Bool(*b),
        Value::Int(i) => ValueKey::Int(*i),
        Value::String(s) => ValueKey::String(s.to_string()),
        _ => return None,
    })
}

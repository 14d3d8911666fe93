//! The fetch-execute loop: dispatches one [`Opcode`] at a time against an
//! [`Instance`]'s stacks until the top-level call returns, the instance
//! suspends itself via a host call, or a [`FatalError`] ends things early.

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::bytecode::{Code, EntryInfo};
use crate::error::FatalError;
use crate::host::{FunctionDescriptor, HostFunctionResolver, ScopeResolver, ScriptEnvironment};
use crate::instance::{ActivationFrame, CheckFrame, Instance, Scope};
use crate::opcode::{Label, Opcode};
use crate::tracer::Tracer;
use crate::value::{arith, absolute, bit_not, loose_eq, negate, strict_eq, ArithOp, MapKey, Value};

/// What a run of the fetch-execute loop ended in.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The top-level call returned this value.
    Completed(Value),
    /// A host function put the instance into [`crate::instance::WaitState::Waiting`];
    /// the caller should call [`crate::instance::Instance::resume`] and invoke
    /// [`resume`] (this module's, not the instance method) to continue.
    Suspended,
}

/// Everything the loop needs besides the instance and the code: the
/// host-function table, the external-scope table, the I/O environment, and
/// the tracer. Bundled so `call`/`resume` don't grow an unbounded parameter
/// list.
pub struct ExecutionContext<'a, 'b> {
    pub resolver: Option<&'a dyn HostFunctionResolver>,
    pub scopes: &'a mut dyn ScopeResolver,
    pub env: &'a mut ScriptEnvironment<'b>,
    pub tracer: &'a dyn Tracer,
}

/// Starts a fresh top-level invocation of `entry` with `args`, running until
/// completion or suspension. `instance` must be freshly created or
/// freshly [`Instance::reset`].
pub fn call(
    code: &Code,
    entry: &EntryInfo,
    args: Vec<Value>,
    instance: &mut Instance,
    ctx: &mut ExecutionContext,
) -> Result<RunOutcome, FatalError> {
    for arg in args {
        push_operand(instance, arg)?;
    }
    instance.activations.push(ActivationFrame { return_index: None });
    instance.scopes.push(Scope::default());
    instance.command_index = entry.start_index;
    run(code, instance, ctx)
}

/// Continues a suspended instance from exactly where it left off.
pub fn resume(code: &Code, instance: &mut Instance, ctx: &mut ExecutionContext) -> Result<RunOutcome, FatalError> {
    instance.resume();
    run(code, instance, ctx)
}

fn push_operand(instance: &mut Instance, v: Value) -> Result<(), FatalError> {
    if instance.operand_stack.len() >= instance.limits.operand_stack_capacity {
        return Err(FatalError::OperandStackOverflow);
    }
    instance.push(v);
    Ok(())
}

fn pop_operand(instance: &mut Instance) -> Result<Value, FatalError> {
    instance.pop().ok_or(FatalError::OperandStackUnderflow)
}

fn target(label: &Label) -> Result<usize, FatalError> {
    label.resolved().ok_or_else(|| FatalError::UnresolvedLabel(format!("{label:?}")))
}

fn run(code: &Code, instance: &mut Instance, ctx: &mut ExecutionContext) -> Result<RunOutcome, FatalError> {
    let commands = code.commands();

    loop {
        if instance.limits.command_runaway_limit > 0
            && instance.instructions_executed >= instance.limits.command_runaway_limit
        {
            return Err(FatalError::RunawayLimitExceeded {
                limit: instance.limits.command_runaway_limit,
            });
        }
        let Some(op) = commands.get(instance.command_index) else {
            return Err(FatalError::BadOpcodeOperand(format!(
                "command index {} out of range",
                instance.command_index
            )));
        };
        ctx.tracer.on_instruction(instance, op);
        instance.instructions_executed += 1;

        match dispatch(op, instance, ctx)? {
            Dispatch::Advance => instance.command_index += 1,
            Dispatch::Jump(idx) => instance.command_index = idx,
            Dispatch::Completed(v) => return Ok(RunOutcome::Completed(v)),
            Dispatch::Suspend => return Ok(RunOutcome::Suspended),
        }
    }
}

enum Dispatch {
    Advance,
    Jump(usize),
    Completed(Value),
    Suspend,
}

fn dispatch(op: &Opcode, instance: &mut Instance, ctx: &mut ExecutionContext) -> Result<Dispatch, FatalError> {
    use Opcode as O;
    Ok(match op {
        O::Noop => Dispatch::Advance,
        O::Push(v) => {
            push_operand(instance, v.clone())?;
            Dispatch::Advance
        }
        O::PushNull => {
            push_operand(instance, Value::Null)?;
            Dispatch::Advance
        }
        O::Pop => {
            pop_operand(instance)?;
            Dispatch::Advance
        }

        O::PushVariable(name) => {
            let v = instance.current_scope().get(name);
            push_operand(instance, v)?;
            Dispatch::Advance
        }
        O::PopVariable(name) => {
            let v = pop_operand(instance)?;
            instance.current_scope_mut().set(name.clone(), v);
            Dispatch::Advance
        }
        O::Set(name, value) => {
            instance.current_scope_mut().set(name.clone(), value.clone());
            Dispatch::Advance
        }
        O::SetVariable(dst, src) => {
            let v = instance.current_scope().get(src);
            instance.current_scope_mut().set(dst.clone(), v);
            Dispatch::Advance
        }

        O::PushScopeVariable(scope, var) => {
            let v = ctx
                .scopes
                .get_scope(scope)
                .and_then(|r| r.get_value(var))
                .unwrap_or(Value::Null);
            push_operand(instance, v)?;
            Dispatch::Advance
        }
        O::PopScopeVariable(scope, var) => {
            let v = pop_operand(instance)?;
            if let Some(resolver) = ctx.scopes.get_scope(scope) {
                if !resolver.is_read_only(var) {
                    resolver.set_value(var, v);
                }
            }
            Dispatch::Advance
        }

        O::PushListNew => {
            push_operand(instance, Value::list(Vec::new()))?;
            Dispatch::Advance
        }
        O::PushListInit => {
            let count = pop_operand(instance)?.as_int().max(0) as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(pop_operand(instance)?);
            }
            items.reverse();
            push_operand(instance, Value::list(items))?;
            Dispatch::Advance
        }
        O::PushListIndex => {
            let index = pop_operand(instance)?;
            let list = pop_operand(instance)?;
            push_operand(instance, list_index(&list, &index))?;
            Dispatch::Advance
        }
        O::PushListIndexContents => {
            let index = instance
                .operand_stack
                .last()
                .cloned()
                .ok_or(FatalError::OperandStackUnderflow)?;
            let list = instance
                .operand_stack
                .get(instance.operand_stack.len().wrapping_sub(2))
                .cloned()
                .ok_or(FatalError::OperandStackUnderflow)?;
            push_operand(instance, list_index(&list, &index))?;
            Dispatch::Advance
        }
        O::PopList => {
            let value = pop_operand(instance)?;
            let index = pop_operand(instance)?;
            let list = pop_operand(instance)?;
            if let Value::List(rc) = list {
                let i = index.as_int();
                if i >= 0 {
                    let i = i as usize;
                    let mut items = rc.borrow_mut();
                    while items.len() <= i {
                        items.push(Value::Null);
                    }
                    items[i] = value;
                }
            }
            Dispatch::Advance
        }

        O::PushMapNew => {
            push_operand(instance, Value::map(IndexMap::new()))?;
            Dispatch::Advance
        }
        O::PushMapInit => {
            let count = pop_operand(instance)?.as_int().max(0) as usize;
            let mut pairs = Vec::with_capacity(count);
            for _ in 0..count {
                let value = pop_operand(instance)?;
                let key = pop_operand(instance)?;
                pairs.push((MapKey::new(key.as_string().to_string()), value));
            }
            pairs.reverse();
            let mut map = IndexMap::with_capacity(pairs.len());
            for (k, v) in pairs {
                map.insert(k, v);
            }
            push_operand(instance, Value::map(map))?;
            Dispatch::Advance
        }
        O::PushMapKey => {
            let key = pop_operand(instance)?;
            let map = pop_operand(instance)?;
            push_operand(instance, map_index(&map, &key))?;
            Dispatch::Advance
        }
        O::PushMapKeyContents => {
            let key = instance
                .operand_stack
                .last()
                .cloned()
                .ok_or(FatalError::OperandStackUnderflow)?;
            let map = instance
                .operand_stack
                .get(instance.operand_stack.len().wrapping_sub(2))
                .cloned()
                .ok_or(FatalError::OperandStackUnderflow)?;
            push_operand(instance, map_index(&map, &key))?;
            Dispatch::Advance
        }
        O::PopMap => {
            let value = pop_operand(instance)?;
            let key = pop_operand(instance)?;
            let map = pop_operand(instance)?;
            if let Value::Map(rc) = map {
                rc.borrow_mut().insert(MapKey::new(key.as_string().to_string()), value);
            }
            Dispatch::Advance
        }

        O::Add => binary_arith(instance, ArithOp::Add)?,
        O::Sub => binary_arith(instance, ArithOp::Sub)?,
        O::Mul => binary_arith(instance, ArithOp::Mul)?,
        O::Div => binary_arith(instance, ArithOp::Div)?,
        O::Mod => binary_arith(instance, ArithOp::Mod)?,
        O::BitAnd => binary_arith(instance, ArithOp::BitAnd)?,
        O::BitOr => binary_arith(instance, ArithOp::BitOr)?,
        O::BitXor => binary_arith(instance, ArithOp::BitXor)?,
        O::LeftShift => binary_arith(instance, ArithOp::ShiftLeft)?,
        O::RightShift => binary_arith(instance, ArithOp::ShiftRight)?,
        O::RightShiftPadded => binary_arith(instance, ArithOp::ShiftRightUnsigned)?,

        O::Not => {
            let v = pop_operand(instance)?;
            push_operand(instance, bit_not(&v))?;
            Dispatch::Advance
        }
        O::Negate => {
            let v = pop_operand(instance)?;
            push_operand(instance, negate(&v))?;
            Dispatch::Advance
        }
        O::Absolute => {
            let v = pop_operand(instance)?;
            push_operand(instance, absolute(&v))?;
            Dispatch::Advance
        }
        O::LogicalNot => {
            let v = pop_operand(instance)?;
            push_operand(instance, Value::Bool(!v.as_bool()))?;
            Dispatch::Advance
        }
        O::LogicalAnd => {
            let b = pop_operand(instance)?;
            let a = pop_operand(instance)?;
            push_operand(instance, Value::Bool(a.as_bool() && b.as_bool()))?;
            Dispatch::Advance
        }
        O::LogicalOr => {
            let b = pop_operand(instance)?;
            let a = pop_operand(instance)?;
            push_operand(instance, Value::Bool(a.as_bool() || b.as_bool()))?;
            Dispatch::Advance
        }

        O::Less => compare_op(instance, |o| o.is_lt())?,
        O::LessOrEqual => compare_op(instance, |o| o.is_le())?,
        O::Greater => compare_op(instance, |o| o.is_gt())?,
        O::GreaterOrEqual => compare_op(instance, |o| o.is_ge())?,
        O::Equal => {
            let b = pop_operand(instance)?;
            let a = pop_operand(instance)?;
            push_operand(instance, Value::Bool(loose_eq(&a, &b)))?;
            Dispatch::Advance
        }
        O::NotEqual => {
            let b = pop_operand(instance)?;
            let a = pop_operand(instance)?;
            push_operand(instance, Value::Bool(!loose_eq(&a, &b)))?;
            Dispatch::Advance
        }
        O::StrictEqual => {
            let b = pop_operand(instance)?;
            let a = pop_operand(instance)?;
            push_operand(instance, Value::Bool(strict_eq(&a, &b)))?;
            Dispatch::Advance
        }
        O::StrictNotEqual => {
            let b = pop_operand(instance)?;
            let a = pop_operand(instance)?;
            push_operand(instance, Value::Bool(!strict_eq(&a, &b)))?;
            Dispatch::Advance
        }

        O::Jump(label) => Dispatch::Jump(target(label)?),
        O::JumpTrue(label) => {
            let cond = pop_operand(instance)?;
            if cond.as_bool() {
                Dispatch::Jump(target(label)?)
            } else {
                Dispatch::Advance
            }
        }
        O::JumpFalse(label) => {
            let cond = pop_operand(instance)?;
            if !cond.as_bool() {
                Dispatch::Jump(target(label)?)
            } else {
                Dispatch::Advance
            }
        }
        O::JumpBranch(if_true, if_false) => {
            let cond = pop_operand(instance)?;
            Dispatch::Jump(target(if cond.as_bool() { if_true } else { if_false })?)
        }
        O::JumpFalseCoalesce(label) => {
            let truthy = instance.peek().map(Value::as_bool).unwrap_or(false);
            if truthy {
                Dispatch::Jump(target(label)?)
            } else {
                pop_operand(instance)?;
                Dispatch::Advance
            }
        }
        O::JumpNullCoalesce(label) => {
            let is_null = matches!(instance.peek(), Some(Value::Null) | None);
            if !is_null {
                Dispatch::Jump(target(label)?)
            } else {
                pop_operand(instance)?;
                Dispatch::Advance
            }
        }

        O::Call(label) => {
            if instance.activations.len() >= instance.limits.activation_stack_capacity {
                return Err(FatalError::ActivationStackOverflow);
            }
            let idx = target(label)?;
            instance.activations.push(ActivationFrame {
                return_index: Some(instance.command_index + 1),
            });
            instance.scopes.push(Scope::default());
            Dispatch::Jump(idx)
        }
        O::CallHost(name) => dispatch_host_call(instance, ctx, None, name)?,
        O::CallHostNamespace(ns, name) => dispatch_host_call(instance, ctx, Some(ns), name)?,
        O::Return => {
            let value = pop_operand(instance)?;
            instance.scopes.pop().ok_or(FatalError::ScopeStackUnderflow)?;
            let frame = instance.activations.pop().ok_or(FatalError::ActivationStackUnderflow)?;
            match frame.return_index {
                Some(idx) => {
                    push_operand(instance, value)?;
                    Dispatch::Jump(idx)
                }
                None => Dispatch::Completed(value),
            }
        }

        O::PushCheck => {
            instance.check_frames.push(CheckFrame {
                operand_depth: instance.operand_stack.len(),
                scope_depth: instance.scopes.len(),
            });
            Dispatch::Advance
        }
        O::PopCheck(depth, keep_result) => {
            let result = if *keep_result { Some(pop_operand(instance)?) } else { None };
            let mut frame = None;
            for _ in 0..(*depth).max(1) {
                frame = instance.check_frames.pop();
                if frame.is_none() {
                    return Err(FatalError::CheckStackUnderflow);
                }
            }
            let frame = frame.ok_or(FatalError::CheckStackUnderflow)?;
            instance.operand_stack.truncate(frame.operand_depth);
            instance.scopes.truncate(frame.scope_depth.max(1));
            if let Some(v) = result {
                push_operand(instance, v)?;
            }
            Dispatch::Advance
        }
        O::CheckError(label) => {
            let is_error = instance.peek().is_some_and(Value::is_error);
            if is_error {
                Dispatch::Jump(target(label)?)
            } else {
                Dispatch::Advance
            }
        }

        O::SetIteratorVariable(name) => {
            let source = pop_operand(instance)?;
            instance
                .current_scope_mut()
                .set(name.clone(), Value::list(vec![source, Value::Int(0)]));
            Dispatch::Advance
        }
        O::Iterate(label, has_key) => {
            let state = pop_operand(instance)?;
            iterate(instance, &state, *has_key, target(label)?)?
        }
    })
}

fn binary_arith(instance: &mut Instance, op: ArithOp) -> Result<Dispatch, FatalError> {
    let b = pop_operand(instance)?;
    let a = pop_operand(instance)?;
    push_operand(instance, arith(op, &a, &b))?;
    Ok(Dispatch::Advance)
}

fn compare_op(instance: &mut Instance, pred: impl Fn(std::cmp::Ordering) -> bool) -> Result<Dispatch, FatalError> {
    let b = pop_operand(instance)?;
    let a = pop_operand(instance)?;
    push_operand(instance, Value::Bool(pred(crate::value::compare(&a, &b))))?;
    Ok(Dispatch::Advance)
}

fn list_index(list: &Value, index: &Value) -> Value {
    match list {
        Value::List(rc) => {
            let i = index.as_int();
            let items = rc.borrow();
            if i < 0 || i as usize >= items.len() {
                Value::Null
            } else {
                items[i as usize].clone()
            }
        }
        _ => Value::Null,
    }
}

fn map_index(map: &Value, key: &Value) -> Value {
    match map {
        Value::Map(rc) => rc
            .borrow()
            .get(&MapKey::new(key.as_string().to_string()))
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn iterate(instance: &mut Instance, state: &Value, has_key: bool, end: usize) -> Result<Dispatch, FatalError> {
    let Value::List(rc) = state else {
        return Err(FatalError::BadOpcodeOperand("corrupted iterator state".to_string()));
    };
    let (source, cursor) = {
        let b = rc.borrow();
        (b[0].clone(), b[1].as_int())
    };
    let cursor = cursor.max(0) as usize;
    match &source {
        Value::List(src) => {
            let len = src.borrow().len();
            if cursor >= len {
                return Ok(Dispatch::Jump(end));
            }
            let elem = src.borrow()[cursor].clone();
            rc.borrow_mut()[1] = Value::Int(cursor as i64 + 1);
            if has_key {
                push_operand(instance, Value::Int(cursor as i64))?;
            }
            push_operand(instance, elem)?;
        }
        Value::Map(src) => {
            let len = src.borrow().len();
            if cursor >= len {
                return Ok(Dispatch::Jump(end));
            }
            let (key, val) = {
                let m = src.borrow();
                let (k, v) = m.get_index(cursor).expect("cursor bounds already checked");
                (k.0.clone(), v.clone())
            };
            rc.borrow_mut()[1] = Value::Int(cursor as i64 + 1);
            if has_key {
                push_operand(instance, Value::string(key))?;
            }
            push_operand(instance, val)?;
        }
        _ => return Ok(Dispatch::Jump(end)),
    }
    Ok(Dispatch::Advance)
}

fn dispatch_host_call(
    instance: &mut Instance,
    ctx: &mut ExecutionContext,
    namespace: Option<&str>,
    name: &str,
) -> Result<Dispatch, FatalError> {
    ctx.tracer.on_host_call(namespace, name);
    let resolver = ctx.resolver.ok_or_else(|| match namespace {
        Some(ns) => FatalError::UnknownNamespacedHostFunction(ns.to_string(), name.to_string()),
        None => FatalError::UnknownHostFunction(name.to_string()),
    })?;
    let descriptor = match namespace {
        Some(ns) => resolver
            .get_namespaced_function(ns, name)
            .ok_or_else(|| FatalError::UnknownNamespacedHostFunction(ns.to_string(), name.to_string()))?,
        None => resolver
            .get_function(name)
            .ok_or_else(|| FatalError::UnknownHostFunction(name.to_string()))?,
    };
    let arity = descriptor.parameter_count() as usize;
    let mut args: SmallVec<[Value; 4]> = SmallVec::with_capacity(arity);
    for _ in 0..arity {
        args.push(pop_operand(instance)?);
    }
    args.reverse();
    // Resuming re-fetches and re-dispatches this same CALL_HOST instruction
    // (the interpreter leaves `command_index` untouched on suspend), so the
    // operand stack must look exactly as it did on entry if the wait turns
    // out to have been triggered: put the popped arguments back before
    // reporting the suspension.
    match descriptor.invoke(instance, args.to_vec()) {
        Ok(v) => {
            if instance.is_waiting() {
                for arg in args {
                    push_operand(instance, arg)?;
                }
                return Ok(Dispatch::Suspend);
            }
            push_operand(instance, v)?;
            Ok(Dispatch::Advance)
        }
        Err((error_type, message)) => {
            ctx.tracer.on_error(&message);
            push_operand(instance, Value::error(error_type, message))?;
            Ok(Dispatch::Advance)
        }
    }
}

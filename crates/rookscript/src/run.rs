//! Host-facing convenience layer over [`crate::interpreter`]: look an entry
//! point up by name, build the one-shot [`crate::interpreter::ExecutionContext`],
//! and drive the instance to completion or suspension.

use crate::error::FatalError;
use crate::host::{ScopeResolver, ScriptEnvironment};
use crate::instance::Instance;
use crate::interpreter::{self, ExecutionContext, RunOutcome};
use crate::script::Script;
use crate::tracer::Tracer;
use crate::value::Value;

/// Runs `entry_name` from the start with `args`, on a freshly created or
/// freshly reset `instance`. Returns [`FatalError::UnknownEntryPoint`] if no
/// such entry exists.
pub fn invoke(
    script: &Script,
    entry_name: &str,
    args: Vec<Value>,
    instance: &mut Instance,
    scopes: &mut dyn ScopeResolver,
    env: &mut ScriptEnvironment,
    tracer: &dyn Tracer,
) -> Result<RunOutcome, FatalError> {
    let entry = script
        .code()
        .entry(entry_name)
        .ok_or_else(|| FatalError::UnknownEntryPoint(entry_name.to_string()))?;
    let mut ctx = ExecutionContext {
        resolver: script.host_function_resolver().map(AsRef::as_ref),
        scopes,
        env,
        tracer,
    };
    interpreter::call(script.code(), &entry, args, instance, &mut ctx)
}

/// Resumes a previously suspended `instance` (one whose last [`invoke`] or
/// [`resume`] returned [`RunOutcome::Suspended`]) after the host has
/// satisfied the wait and called [`Instance::resume`](crate::instance::Instance::resume).
pub fn resume(
    script: &Script,
    instance: &mut Instance,
    scopes: &mut dyn ScopeResolver,
    env: &mut ScriptEnvironment,
    tracer: &dyn Tracer,
) -> Result<RunOutcome, FatalError> {
    let mut ctx = ExecutionContext {
        resolver: script.host_function_resolver().map(AsRef::as_ref),
        scopes,
        env,
        tracer,
    };
    interpreter::resume(script.code(), instance, &mut ctx)
}

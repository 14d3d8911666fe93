//! Interfaces a host application implements to plug itself into a running
//! script: host-callable functions, named external scopes, the preprocessor
//! include resolver, and the stdio/host-object environment bundle.

use std::collections::HashMap;
use std::io::{Read, Write};

use crate::error::FatalError;
use crate::instance::Instance;
use crate::value::Value;

/// A single host-callable function: its fixed arity and the closure that
/// performs the call. `invoke` receives the instance (so it can read the
/// `arity` arguments the caller already pushed) and must leave exactly one
/// result value for the caller to consume.
pub trait FunctionDescriptor {
    fn parameter_count(&self) -> u32;

    /// Performs the call. `args` holds exactly `parameter_count()` values,
    /// already popped off the operand stack in call order. Returning `Err`
    /// converts to a first-class `Value::Error` on the stack (`type` is the
    /// caller-supplied short name); it is never a [`FatalError`].
    fn invoke(&self, instance: &mut Instance, args: Vec<Value>) -> Result<Value, (String, String)>;
}

/// Name → function lookup, with an optional namespace qualifier
/// (`ns::name`). Implementations are composable: a caller can try several
/// resolvers in order and take the first hit — see [`MapHostFunctionResolver`]
/// for the common single-table case, and [`ChainedResolver`] for composition.
pub trait HostFunctionResolver {
    fn get_function(&self, name: &str) -> Option<&dyn FunctionDescriptor>;
    fn get_namespaced_function(&self, namespace: &str, name: &str) -> Option<&dyn FunctionDescriptor>;
}

/// A resolver backed by a case-insensitive name table, with an optional
/// nested table per namespace. The common case for embedding: register a
/// handful of closures-as-descriptors and hand the map to the interpreter.
#[derive(Default)]
pub struct MapHostFunctionResolver {
    functions: HashMap<String, Box<dyn FunctionDescriptor>>,
    namespaces: HashMap<String, HashMap<String, Box<dyn FunctionDescriptor>>>,
}

impl MapHostFunctionResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, descriptor: Box<dyn FunctionDescriptor>) {
        self.functions.insert(name.into().to_lowercase(), descriptor);
    }

    pub fn register_namespaced(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        descriptor: Box<dyn FunctionDescriptor>,
    ) {
        self.namespaces
            .entry(namespace.into().to_lowercase())
            .or_default()
            .insert(name.into().to_lowercase(), descriptor);
    }
}

impl HostFunctionResolver for MapHostFunctionResolver {
    fn get_function(&self, name: &str) -> Option<&dyn FunctionDescriptor> {
        self.functions.get(&name.to_lowercase()).map(AsRef::as_ref)
    }

    fn get_namespaced_function(&self, namespace: &str, name: &str) -> Option<&dyn FunctionDescriptor> {
        self.namespaces
            .get(&namespace.to_lowercase())
            .and_then(|ns| ns.get(&name.to_lowercase()))
            .map(AsRef::as_ref)
    }
}

/// Tries each resolver in registration order, returning the first hit.
#[derive(Default)]
pub struct ChainedResolver {
    resolvers: Vec<Box<dyn HostFunctionResolver>>,
}

impl ChainedResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resolver: Box<dyn HostFunctionResolver>) {
        self.resolvers.push(resolver);
    }
}

impl HostFunctionResolver for ChainedResolver {
    fn get_function(&self, name: &str) -> Option<&dyn FunctionDescriptor> {
        self.resolvers.iter().find_map(|r| r.get_function(name))
    }

    fn get_namespaced_function(&self, namespace: &str, name: &str) -> Option<&dyn FunctionDescriptor> {
        self.resolvers
            .iter()
            .find_map(|r| r.get_namespaced_function(namespace, name))
    }
}

/// A single externally-resolved variable scope (the target of a
/// `scope::name` reference). Reads that miss yield NULL; writes to an
/// absent or read-only name are no-ops, per `§4.3`.
pub trait VariableResolver {
    fn get_value(&self, name: &str) -> Option<Value>;
    fn set_value(&mut self, name: &str, value: Value);
    fn is_read_only(&self, name: &str) -> bool;
}

/// Name → external-scope lookup for `scope::name` references.
pub trait ScopeResolver {
    fn get_scope(&mut self, name: &str) -> Option<&mut dyn VariableResolver>;
    fn contains_scope(&self, name: &str) -> bool;
}

/// A `ScopeResolver` with no registered scopes; every lookup misses. The
/// default when a host has no external scopes to expose.
#[derive(Default)]
pub struct NullScopeResolver;

impl ScopeResolver for NullScopeResolver {
    fn get_scope(&mut self, _name: &str) -> Option<&mut dyn VariableResolver> {
        None
    }

    fn contains_scope(&self, _name: &str) -> bool {
        false
    }
}

/// Resolves `#include` directives encountered by the lexer: given the
/// current stream name and a requested path, produces a canonical path and
/// a readable stream for it.
pub trait Includer {
    fn resolve_path(&self, current_stream: &str, requested_path: &str) -> Result<String, FatalError>;
    fn open(&self, canonical_path: &str) -> Result<Box<dyn Read>, FatalError>;
}

/// An `Includer` that refuses every `#include`; the default when a host
/// does not support preprocessing.
#[derive(Default)]
pub struct NullIncluder;

impl Includer for NullIncluder {
    fn resolve_path(&self, _current_stream: &str, requested_path: &str) -> Result<String, FatalError> {
        Err(FatalError::Unsupported(format!(
            "includes are not supported (requested `{requested_path}`)"
        )))
    }

    fn open(&self, _canonical_path: &str) -> Result<Box<dyn Read>, FatalError> {
        Err(FatalError::Unsupported("includes are not supported".to_string()))
    }
}

/// Bundles a host-object reference plus the stdio sinks a running instance
/// writes to / reads from. Instances never touch `std::io` directly — every
/// script-visible I/O built-in funnels through here.
pub struct ScriptEnvironment<'a> {
    pub host_object: Option<Box<dyn std::any::Any>>,
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
    pub stdin: &'a mut dyn Read,
}

impl<'a> ScriptEnvironment<'a> {
    pub fn new(stdout: &'a mut dyn Write, stderr: &'a mut dyn Write, stdin: &'a mut dyn Read) -> Self {
        Self {
            host_object: None,
            stdout,
            stderr,
            stdin,
        }
    }
}

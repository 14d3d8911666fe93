//! Execution tracing: an optional hook the interpreter calls on every
//! dispatched instruction, host call, and raised error. This is the crate's
//! logging seam — there is no `log`/`tracing` dependency; a host that wants
//! structured logging implements [`Tracer`] itself and bridges into whatever
//! it already uses, the same way an embeddable VM keeps its tracer interface
//! decoupled from any particular logging backend.

use crate::instance::Instance;
use crate::opcode::Opcode;

pub trait Tracer {
    fn on_instruction(&self, _instance: &Instance, _op: &Opcode) {}
    fn on_call(&self, _name: &str) {}
    fn on_host_call(&self, _namespace: Option<&str>, _name: &str) {}
    fn on_error(&self, _message: &str) {}
}

/// The default: tracing costs nothing unless a host opts in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

/// Writes one line per event to stderr. Useful for `rookscript-cli` and for
/// debugging a host integration; not meant for production volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl Tracer for StderrTracer {
    fn on_instruction(&self, instance: &Instance, op: &Opcode) {
        eprintln!("[{:>6}] {:<22} {op:?}", instance.command_index, op.mnemonic());
    }

    fn on_call(&self, name: &str) {
        eprintln!("  call {name}");
    }

    fn on_host_call(&self, namespace: Option<&str>, name: &str) {
        match namespace {
            Some(ns) => eprintln!("  call-host {ns}::{name}"),
            None => eprintln!("  call-host {name}"),
        }
    }

    fn on_error(&self, message: &str) {
        eprintln!("  error: {message}");
    }
}

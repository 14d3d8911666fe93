//! RookScript: a small, dynamically-typed imperative scripting language
//! meant to be embedded in a host application, not run standalone. A host
//! compiles source into a [`Script`], registers its [`host::HostFunctionResolver`]
//! and [`host::ScopeResolver`], then drives an [`instance::Instance`] with
//! [`run::invoke`]/[`run::resume`].
//!
//! Pipeline: [`lexer`] → [`parser`] (emits directly into a [`bytecode::Code`],
//! no intermediate AST) → [`optimizer`] (peephole cleanup + label
//! resolution) → [`interpreter`] (the fetch-execute loop). [`factory`]
//! recycles [`instance::Instance`]s across repeated invocations of the same
//! script.

pub mod bytecode;
pub mod error;
pub mod factory;
pub mod host;
pub mod instance;
pub mod interpreter;
pub mod lexer;
pub mod limits;
pub mod opcode;
pub mod optimizer;
pub mod parser;
pub mod run;
pub mod script;
pub mod tracer;
pub mod value;

pub use bytecode::{Code, EntryInfo};
pub use error::{CompileError, Diagnostic, FatalError};
pub use instance::Instance;
pub use interpreter::RunOutcome;
pub use limits::VmLimits;
pub use script::Script;
pub use value::Value;

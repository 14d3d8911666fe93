//! Public entry point for turning source text into a [`Code`] ready to run,
//! and for creating instances bound to it.

use std::rc::Rc;

use crate::bytecode::Code;
use crate::error::CompileError;
use crate::host::{HostFunctionResolver, Includer, NullIncluder};
use crate::lexer::Lexer;
use crate::optimizer;
use crate::parser::Parser;

/// A compiled script: the command array plus its entry/function tables and
/// an optional host-function resolver. Cheap to clone (everything but the
/// resolver is owned data; `Code` itself is not `Rc`-wrapped here so that a
/// host which wants to share one `Script` across threads can wrap it
/// itself).
pub struct Script {
    code: Code,
    resolver: Option<Rc<dyn HostFunctionResolver>>,
}

impl Script {
    /// Compiles `source` (named `stream_name` for diagnostics) through the
    /// full pipeline: lex, parse + emit, peephole-optimize, resolve labels.
    pub fn compile(stream_name: impl Into<String>, source: impl Into<String>) -> Result<Self, CompileError> {
        let includer = NullIncluder;
        Self::compile_with_includer(stream_name, source, &includer)
    }

    pub fn compile_with_includer(
        stream_name: impl Into<String>,
        source: impl Into<String>,
        includer: &dyn Includer,
    ) -> Result<Self, CompileError> {
        let stream_name = stream_name.into();
        let lexer = Lexer::new(stream_name.clone(), source.into(), includer);
        let (tokens, lex_diags) = lexer.tokenize();

        let mut parser = Parser::new(tokens, stream_name);
        let code = parser.parse_script();
        let mut diags = lex_diags;
        diags.extend(parser.into_diagnostics());
        if !diags.is_empty() {
            return Err(CompileError::new(diags));
        }

        let mut code = code;
        optimizer::optimize(&mut code);
        Ok(Self { code, resolver: None })
    }

    pub fn set_host_function_resolver(&mut self, resolver: Rc<dyn HostFunctionResolver>) {
        self.resolver = Some(resolver);
    }

    #[must_use]
    pub fn host_function_resolver(&self) -> Option<&Rc<dyn HostFunctionResolver>> {
        self.resolver.as_ref()
    }

    #[must_use]
    pub fn code(&self) -> &Code {
        &self.code
    }

    #[must_use]
    pub fn entry_names(&self) -> Vec<&str> {
        self.code.entry_names()
    }
}

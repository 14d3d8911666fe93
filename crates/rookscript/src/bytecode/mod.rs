//! Compiled-script representation: the command array plus entry/function/
//! label tables the parser emits into directly and the optimizer rewrites
//! in place.

pub use code::{Code, EntryInfo};

mod code;

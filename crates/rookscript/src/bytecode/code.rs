//! The compiled form of a script: a command array plus the name tables the
//! interpreter and emitter both need.

use std::collections::HashMap;

use crate::opcode::{Label, Opcode};

/// A callable entry in either the script-entry table or the local-function
/// table: its parameter count and the command index its body starts at.
#[derive(Debug, Clone, Copy)]
pub struct EntryInfo {
    pub param_count: u32,
    pub start_index: usize,
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

/// The sequence of commands plus the two name tables (`scriptEntries`,
/// `functionEntries`) and the label table described in `§4.4`. Lookups in
/// either name table are case-insensitive. Labels live as strings until
/// [`crate::optimizer::optimize`] resolves them to absolute indices.
#[derive(Debug, Clone, Default)]
pub struct Code {
    commands: Vec<Opcode>,
    labels: HashMap<String, usize>,
    entries: HashMap<String, EntryInfo>,
    functions: HashMap<String, EntryInfo>,
    next_label_id: u64,
}

impl Code {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn commands(&self) -> &[Opcode] {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut Vec<Opcode> {
        &mut self.commands
    }

    /// Appends a command, returning its index. The command array is
    /// append-only during emission; only the optimizer rewrites it.
    pub fn append(&mut self, op: Opcode) -> usize {
        let idx = self.commands.len();
        self.commands.push(op);
        idx
    }

    #[must_use]
    pub fn next_index(&self) -> usize {
        self.commands.len()
    }

    /// Generates a fresh symbolic label with the given prefix, guaranteed
    /// unique within this `Code`.
    pub fn generate_label(&mut self, prefix: &str) -> String {
        let id = self.next_label_id;
        self.next_label_id += 1;
        format!("${prefix}{id}")
    }

    pub fn set_label(&mut self, name: impl Into<String>, index: usize) {
        self.labels.insert(name.into(), index);
    }

    #[must_use]
    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    #[must_use]
    pub fn label_table(&self) -> &HashMap<String, usize> {
        &self.labels
    }

    pub fn add_entry(&mut self, name: impl Into<String>, info: EntryInfo) {
        self.entries.insert(fold(&name.into()), info);
    }

    #[must_use]
    pub fn entry(&self, name: &str) -> Option<EntryInfo> {
        self.entries.get(&fold(name)).copied()
    }

    #[must_use]
    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn add_function(&mut self, name: impl Into<String>, info: EntryInfo) {
        self.functions.insert(fold(&name.into()), info);
    }

    #[must_use]
    pub fn function(&self, name: &str) -> Option<EntryInfo> {
        self.functions.get(&fold(name)).copied()
    }

    /// Replaces the command stream wholesale (used by the optimizer's
    /// compaction pass, which builds a new, shorter command vector).
    pub fn set_commands(&mut self, commands: Vec<Opcode>) {
        self.commands = commands;
    }

    /// Remaps every label's command index through `remap` (old index →
    /// new index), used after the optimizer compacts the command stream.
    pub fn remap_labels(&mut self, remap: &[usize]) {
        for idx in self.labels.values_mut() {
            *idx = remap[*idx];
        }
    }

    /// Remaps every entry's and function's start index through `remap`,
    /// same as [`Self::remap_labels`].
    pub fn remap_entries(&mut self, remap: &[usize]) {
        for info in self.entries.values_mut() {
            info.start_index = remap[info.start_index];
        }
        for info in self.functions.values_mut() {
            info.start_index = remap[info.start_index];
        }
    }

    /// Rewrites every label operand in the command stream to an absolute
    /// command index, consuming the label table. Called once, after the
    /// optimizer's peephole pass. Returns the name of the first label that
    /// could not be resolved, if any.
    pub fn resolve_labels(&mut self) -> Result<(), String> {
        for cmd in &mut self.commands {
            for label in cmd.labels_mut() {
                if let Label::Named(name) = label {
                    match self.labels.get(name) {
                        Some(&idx) => *label = Label::Resolved(idx),
                        None => return Err(name.clone()),
                    }
                }
            }
        }
        Ok(())
    }
}

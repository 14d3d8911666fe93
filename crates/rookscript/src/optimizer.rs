//! A single peephole pass over the freshly-emitted command stream, applied
//! to a fixed point, followed by compaction and label resolution.
//!
//! Rules (`§4.7`): drop `NOOP`s, forward a `JUMP` whose target is itself a
//! plain `JUMP` to the final target, drop a `JUMP` to the instruction that
//! immediately follows it, collapse `PUSH x; POP` and `PUSH_VARIABLE x;
//! POP_VARIABLE x` pairs. After rewriting, every label is resolved to an
//! absolute command index — the interpreter never does a string lookup.

use crate::bytecode::Code;
use crate::opcode::{Label, Opcode};

/// A safety bound on jump-chain forwarding so a label cycle (which a
/// correct parser never emits, but a pathological one could) cannot hang
/// the optimizer.
const MAX_FORWARD_HOPS: usize = 64;

pub fn optimize(code: &mut Code) {
    fold_to_fixed_point(code);
    compact(code);
    if let Err(name) = code.resolve_labels() {
        // A label that the parser generated but never placed is an
        // internal bug, not a user-facing compile error; surfacing it as
        // a panic here would be misleading during normal operation, so we
        // leave the label unresolved and let instance creation report it
        // as a fatal error instead.
        let _ = name;
    }
}

fn label_target(code: &Code, label: &Label) -> Option<usize> {
    match label {
        Label::Resolved(idx) => Some(*idx),
        Label::Named(name) => code.label_index(name),
    }
}

fn fold_to_fixed_point(code: &mut Code) {
    loop {
        let mut changed = false;
        changed |= forward_jump_chains(code);
        changed |= remove_jump_to_next(code);
        changed |= collapse_push_pop(code);
        changed |= collapse_push_pop_variable(code);
        if !changed {
            break;
        }
    }
}

fn forward_jump_chains(code: &mut Code) -> bool {
    let mut changed = false;
    let len = code.commands().len();
    for i in 0..len {
        let Some(Opcode::Jump(label)) = code.commands().get(i) else { continue };
        let mut target = match label_target(code, label) {
            Some(t) => t,
            None => continue,
        };
        let mut hops = 0;
        let mut final_label = None;
        while hops < MAX_FORWARD_HOPS {
            match code.commands().get(target) {
                Some(Opcode::Jump(inner)) if label_target(code, inner) != Some(target) => {
                    final_label = Some(inner.clone());
                    target = match label_target(code, inner) {
                        Some(t) => t,
                        None => break,
                    };
                    hops += 1;
                }
                _ => break,
            }
        }
        if let Some(new_label) = final_label {
            code.commands_mut()[i] = Opcode::Jump(new_label);
            changed = true;
        }
    }
    changed
}

fn remove_jump_to_next(code: &mut Code) -> bool {
    let mut changed = false;
    let len = code.commands().len();
    for i in 0..len {
        let Some(Opcode::Jump(label)) = code.commands().get(i) else { continue };
        if label_target(code, label) == Some(i + 1) {
            code.commands_mut()[i] = Opcode::Noop;
            changed = true;
        }
    }
    changed
}

fn collapse_push_pop(code: &mut Code) -> bool {
    let mut changed = false;
    let len = code.commands().len();
    for i in 0..len.saturating_sub(1) {
        let is_pair = matches!(code.commands().get(i), Some(Opcode::Push(_)) | Some(Opcode::PushNull))
            && matches!(code.commands().get(i + 1), Some(Opcode::Pop));
        if is_pair {
            code.commands_mut()[i] = Opcode::Noop;
            code.commands_mut()[i + 1] = Opcode::Noop;
            changed = true;
        }
    }
    changed
}

fn collapse_push_pop_variable(code: &mut Code) -> bool {
    let mut changed = false;
    let len = code.commands().len();
    for i in 0..len.saturating_sub(1) {
        let pair_names = match (code.commands().get(i), code.commands().get(i + 1)) {
            (Some(Opcode::PushVariable(a)), Some(Opcode::PopVariable(b))) if a.eq_ignore_ascii_case(b) => true,
            _ => false,
        };
        if pair_names {
            code.commands_mut()[i] = Opcode::Noop;
            code.commands_mut()[i + 1] = Opcode::Noop;
            changed = true;
        }
    }
    changed
}

/// Removes every `Noop` left behind by the fold passes, building an
/// old-index → new-index map (forward-filled so a label that pointed at a
/// removed instruction now points at the next surviving one) and applying
/// it to the label table, the entry tables, and every jump operand.
fn compact(code: &mut Code) {
    let old_commands = code.commands().to_vec();
    let mut remap = vec![0usize; old_commands.len() + 1];
    let mut kept = Vec::with_capacity(old_commands.len());
    for (old_idx, op) in old_commands.iter().enumerate() {
        remap[old_idx] = kept.len();
        if !matches!(op, Opcode::Noop) {
            kept.push(op.clone());
        }
    }
    remap[old_commands.len()] = kept.len();

    for op in &mut kept {
        for label in op.labels_mut() {
            if let Label::Resolved(idx) = label {
                *idx = remap[*idx];
            }
        }
    }

    code.remap_labels(&remap);
    code.remap_entries(&remap);
    code.set_commands(kept);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn removes_dead_noops() {
        let mut code = Code::new();
        code.append(Opcode::Noop);
        code.append(Opcode::Push(Value::Int(1)));
        code.append(Opcode::Noop);
        optimize(&mut code);
        assert_eq!(code.commands().len(), 1);
    }

    #[test]
    fn collapses_push_pop_pair() {
        let mut code = Code::new();
        code.append(Opcode::Push(Value::Int(1)));
        code.append(Opcode::Pop);
        code.append(Opcode::PushNull);
        optimize(&mut code);
        assert_eq!(code.commands(), &[Opcode::PushNull]);
    }

    #[test]
    fn removes_jump_to_next_instruction() {
        let mut code = Code::new();
        code.set_label("next", 1);
        code.append(Opcode::Jump(Label::Named("next".to_string())));
        code.append(Opcode::PushNull);
        optimize(&mut code);
        assert_eq!(code.commands(), &[Opcode::PushNull]);
    }

    #[test]
    fn forwards_jump_chains_to_final_target() {
        let mut code = Code::new();
        code.set_label("a", 1);
        code.set_label("b", 2);
        code.append(Opcode::Jump(Label::Named("a".to_string()))); // 0
        code.append(Opcode::Jump(Label::Named("b".to_string()))); // 1 -> forwards to 2
        code.append(Opcode::PushNull); // 2
        optimize(&mut code);
        // instruction 0 should now jump straight to the (remapped) PushNull.
        match &code.commands()[0] {
            Opcode::Jump(Label::Resolved(idx)) => {
                assert_eq!(code.commands()[*idx], Opcode::PushNull);
            }
            other => panic!("expected resolved jump, got {other:?}"),
        }
    }
}

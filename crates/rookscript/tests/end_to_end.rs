//! End-to-end scenarios exercising the full lex → parse → optimize → run
//! pipeline through the public API a host would actually use.

use std::io;
use std::rc::Rc;

use rookscript::host::{FunctionDescriptor, MapHostFunctionResolver, NullScopeResolver, ScriptEnvironment};
use rookscript::instance::Instance;
use rookscript::tracer::NoopTracer;
use rookscript::value::Value;
use rookscript::{FatalError, RunOutcome, Script, VmLimits};

fn run_main(source: &str, args: Vec<Value>) -> Result<RunOutcome, FatalError> {
    run_entry(source, "main", args, None)
}

fn run_entry(
    source: &str,
    entry: &str,
    args: Vec<Value>,
    resolver: Option<MapHostFunctionResolver>,
) -> Result<RunOutcome, FatalError> {
    let mut script = Script::compile("test", source).expect("script should compile");
    if let Some(r) = resolver {
        script.set_host_function_resolver(Rc::new(r));
    }
    let mut instance = Instance::new(VmLimits::default());
    let mut scopes = NullScopeResolver;
    let mut stdout = io::sink();
    let mut stderr = io::sink();
    let mut stdin = io::empty();
    let mut env = ScriptEnvironment::new(&mut stdout, &mut stderr, &mut stdin);
    rookscript::run::invoke(&script, entry, args, &mut instance, &mut scopes, &mut env, &NoopTracer)
}

fn completed(outcome: RunOutcome) -> Value {
    match outcome {
        RunOutcome::Completed(v) => v,
        RunOutcome::Suspended => panic!("expected completion, got suspension"),
    }
}

#[test]
fn arithmetic_and_return() {
    let out = run_main("entry main() { return 2 + 3 * 4; }", vec![]).unwrap();
    assert_eq!(completed(out), Value::Int(14));
}

#[test]
fn string_concatenation_and_coercion() {
    let out = run_main(r#"entry main() { return "n=" + 3; }"#, vec![]).unwrap();
    assert_eq!(completed(out).to_display_string(), "n=3");
}

#[test]
fn parameters_flow_through_prelude() {
    let out = run_main("entry main(a, b) { return a + b; }", vec![Value::Int(4), Value::Int(5)]).unwrap();
    assert_eq!(completed(out), Value::Int(9));
}

#[test]
fn if_else_branches() {
    let src = "entry main(x) { if (x > 0) { return 1; } else { return -1; } }";
    assert_eq!(completed(run_main(src, vec![Value::Int(5)]).unwrap()), Value::Int(1));
    assert_eq!(completed(run_main(src, vec![Value::Int(-5)]).unwrap()), Value::Int(-1));
}

#[test]
fn while_loop_accumulates() {
    let src = "entry main() { total = 0; i = 0; while (i < 5) { total = total + i; i = i + 1; } return total; }";
    assert_eq!(completed(run_main(src, vec![]).unwrap()), Value::Int(10));
}

#[test]
fn for_loop_accumulates() {
    let src = "entry main() { total = 0; for (i = 0; i < 5; i = i + 1) { total = total + i; } return total; }";
    assert_eq!(completed(run_main(src, vec![]).unwrap()), Value::Int(10));
}

#[test]
fn each_over_list_sums_values() {
    let src = "entry main() { total = 0; each (v: [1, 2, 3, 4]) { total = total + v; } return total; }";
    assert_eq!(completed(run_main(src, vec![]).unwrap()), Value::Int(10));
}

#[test]
fn each_over_list_exposes_index_as_key() {
    let src = "entry main() { last = -1; each (k, v: [10, 20, 30]) { last = k; } return last; }";
    assert_eq!(completed(run_main(src, vec![]).unwrap()), Value::Int(2));
}

#[test]
fn function_call_between_declarations() {
    let src = "entry main() { return double(21); } function double(x) { return x * 2; }";
    assert_eq!(completed(run_main(src, vec![]).unwrap()), Value::Int(42));
}

#[test]
fn list_index_assignment_and_compound_assignment() {
    let src = "entry main() { l = [1, 2, 3]; l[1] += 10; return l[1]; }";
    assert_eq!(completed(run_main(src, vec![]).unwrap()), Value::Int(12));
}

#[test]
fn map_key_assignment_round_trips() {
    let src = r#"entry main() { m = {a: 1}; m.b = 2; return m.a + m.b; }"#;
    assert_eq!(completed(run_main(src, vec![]).unwrap()), Value::Int(3));
}

#[test]
fn short_circuit_and_does_not_evaluate_right_side() {
    let src = r#"entry main() { calls = 0; a = false && sideEffect(); return calls; }
    function sideEffect() { return true; }"#;
    // `calls` is never mutated by sideEffect since it is never called;
    // the important assertion is that this terminates without invoking
    // an undeclared host function, since `&&` must short-circuit.
    assert_eq!(completed(run_main(src, vec![]).unwrap()), Value::Int(0));
}

#[test]
fn null_coalesce_uses_fallback_only_when_null() {
    let src = "entry main() { a = null; return a ?? 7; }";
    assert_eq!(completed(run_main(src, vec![]).unwrap()), Value::Int(7));

    let src2 = "entry main() { a = 3; return a ?? 7; }";
    assert_eq!(completed(run_main(src2, vec![]).unwrap()), Value::Int(3));
}

#[test]
fn ternary_selects_branch() {
    let src = "entry main(x) { return x > 0 ? \"pos\" : \"neg\"; }";
    assert_eq!(
        completed(run_main(src, vec![Value::Int(1)]).unwrap()).to_display_string(),
        "pos"
    );
}

struct AlwaysError;
impl FunctionDescriptor for AlwaysError {
    fn parameter_count(&self) -> u32 {
        0
    }
    fn invoke(&self, _instance: &mut Instance, _args: Vec<Value>) -> Result<Value, (String, String)> {
        Err(("IoError".to_string(), "disk on fire".to_string()))
    }
}

struct AddOne;
impl FunctionDescriptor for AddOne {
    fn parameter_count(&self) -> u32 {
        1
    }
    fn invoke(&self, _instance: &mut Instance, args: Vec<Value>) -> Result<Value, (String, String)> {
        Ok(Value::Int(args[0].as_int() + 1))
    }
}

#[test]
fn check_block_catches_host_error_and_skips_rest_of_body() {
    let mut resolver = MapHostFunctionResolver::new();
    resolver.register("explode", Box::new(AlwaysError));
    resolver.register("addOne", Box::new(AddOne));

    let src = "entry main() { reached = false; check (err) { explode(); reached = true; } return err; }";
    let out = run_entry(src, "main", vec![], Some(resolver)).unwrap();
    match completed(out) {
        Value::Error(e) => {
            assert_eq!(e.error_type, "IoError");
            assert_eq!(e.message, "disk on fire");
        }
        other => panic!("expected an error value, got {other:?}"),
    }
}

#[test]
fn check_block_leaves_null_when_no_error_occurs() {
    let mut resolver = MapHostFunctionResolver::new();
    resolver.register("addOne", Box::new(AddOne));

    let src = "entry main() { total = 0; check (err) { total = addOne(total); } return err; }";
    let out = run_entry(src, "main", vec![], Some(resolver)).unwrap();
    assert_eq!(completed(out), Value::Null);
}

#[test]
fn stack_depth_is_balanced_after_a_normal_return() {
    let mut script = Script::compile("test", "entry main() { return 1; }").unwrap();
    script.set_host_function_resolver(Rc::new(MapHostFunctionResolver::new()));
    let mut instance = Instance::new(VmLimits::default());
    let mut scopes = NullScopeResolver;
    let mut stdout = io::sink();
    let mut stderr = io::sink();
    let mut stdin = io::empty();
    let mut env = ScriptEnvironment::new(&mut stdout, &mut stderr, &mut stdin);
    let before = instance.operand_stack.len();
    let out = rookscript::run::invoke(&script, "main", vec![], &mut instance, &mut scopes, &mut env, &NoopTracer)
        .unwrap();
    assert!(matches!(out, RunOutcome::Completed(Value::Int(1))));
    assert_eq!(instance.operand_stack.len(), before + 1);
}

#[test]
fn runaway_limit_terminates_infinite_loop() {
    let mut script = Script::compile("test", "entry main() { while (true) {} }").unwrap();
    script.set_host_function_resolver(Rc::new(MapHostFunctionResolver::new()));
    let limits = VmLimits::builder().command_runaway_limit(1000).build();
    let mut instance = Instance::new(limits);
    let mut scopes = NullScopeResolver;
    let mut stdout = io::sink();
    let mut stderr = io::sink();
    let mut stdin = io::empty();
    let mut env = ScriptEnvironment::new(&mut stdout, &mut stderr, &mut stdin);
    let err = rookscript::run::invoke(&script, "main", vec![], &mut instance, &mut scopes, &mut env, &NoopTracer)
        .unwrap_err();
    assert_eq!(err, FatalError::RunawayLimitExceeded { limit: 1000 });
}

#[test]
fn scope_isolation_between_nested_calls() {
    let src = "entry main() { x = 1; helper(); return x; } function helper() { x = 99; }";
    assert_eq!(completed(run_main(src, vec![]).unwrap()), Value::Int(1));
}

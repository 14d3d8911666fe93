//! Reference executor: `rookscript [options] <source> [--] <scriptArgs...>`.
//!
//! Exit codes: 0 on clean entry-point termination with a non-error return;
//! 1 on compile error; 2 on runtime error; 3 on I/O error opening the
//! source. No environment variables are consulted.

use std::env;
use std::fs;
use std::io;
use std::process::ExitCode;

use rookscript::host::{NullScopeResolver, ScriptEnvironment};
use rookscript::tracer::{NoopTracer, StderrTracer, Tracer};
use rookscript::value::Value;
use rookscript::{Instance, Script, VmLimits};

struct Args {
    source_path: String,
    entry: String,
    trace: bool,
    script_args: Vec<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut entry = "main".to_string();
    let mut trace = false;
    let mut source_path = None;
    let mut script_args = Vec::new();

    let mut iter = env::args().skip(1).peekable();
    while let Some(arg) = iter.next() {
        if arg == "--" {
            script_args.extend(iter);
            break;
        }
        match arg.as_str() {
            "--entry" => {
                entry = iter.next().ok_or("--entry requires a value")?;
            }
            "--trace" => trace = true,
            _ if source_path.is_none() => source_path = Some(arg),
            _ => script_args.push(arg),
        }
    }

    Ok(Args {
        source_path: source_path.ok_or("missing <source> argument")?,
        entry,
        trace,
        script_args,
    })
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(a) => a,
        Err(message) => {
            eprintln!("usage: rookscript [--entry NAME] [--trace] <source> [--] <scriptArgs...>");
            eprintln!("error: {message}");
            return ExitCode::from(1);
        }
    };

    let source = match fs::read_to_string(&args.source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("rookscript: cannot open `{}`: {e}", args.source_path);
            return ExitCode::from(3);
        }
    };

    let script = match Script::compile(args.source_path.clone(), source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    let tracer: Box<dyn Tracer> = if args.trace { Box::new(StderrTracer) } else { Box::new(NoopTracer) };
    let mut instance = Instance::new(VmLimits::default());
    let mut scopes = NullScopeResolver;
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let mut stdin = io::stdin();
    let mut env = ScriptEnvironment::new(&mut stdout, &mut stderr, &mut stdin);

    let script_args = args.script_args.into_iter().map(Value::string).collect();
    let outcome = rookscript::run::invoke(
        &script,
        &args.entry,
        script_args,
        &mut instance,
        &mut scopes,
        &mut env,
        tracer.as_ref(),
    );

    match outcome {
        Ok(rookscript::RunOutcome::Completed(value)) => {
            if value.is_error() {
                eprintln!("{}", value.to_display_string());
                ExitCode::from(2)
            } else {
                ExitCode::from(0)
            }
        }
        Ok(rookscript::RunOutcome::Suspended) => {
            eprintln!("rookscript: entry point suspended with no host driver to resume it");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("rookscript: {e}");
            ExitCode::from(2)
        }
    }
}

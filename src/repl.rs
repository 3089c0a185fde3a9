use std::io::{BufRead, Write};

use ooze_core::pc::{any, choose, constant, map, n, seq, PState};
use ooze_core::{Bindings, Env};
use ooze_runtime::ExecutorRef;

const COLLAPSED_FNS: [&str; 4] = ["clone", "to_string", "serialize", "deserialize"];

#[derive(Debug, PartialEq)]
enum Command {
    Help,
    Bindings,
    Functions,
    Types,
    Release(String),
    Await(Vec<String>),
    Eval(String),
}

fn parse_command(line: &str) -> Result<Command, Vec<String>> {
    let words: Vec<String> = line.split(' ').filter(|w| !w.is_empty()).map(String::from).collect();

    let help = map(constant("h", "h".to_string()), |_| Command::Help);
    let bindings = map(constant("b", "b".to_string()), |_| Command::Bindings);
    let functions = map(constant("f", "f".to_string()), |_| Command::Functions);
    let types = map(constant("t", "t".to_string()), |_| Command::Types);
    let release = map(seq((constant("r", "r".to_string()), any())), |(_, var)| {
        Command::Release(var)
    });
    let await_cmd = map(seq((constant("a", "a".to_string()), n(any()))), |(_, names)| {
        Command::Await(names)
    });
    let eval = map(seq((constant("e", "e".to_string()), any())), |(_, file)| {
        Command::Eval(file)
    });

    let parser = choose((help, eval, bindings, functions, types, release, await_cmd));

    let mut state = PState::new(&words);
    match parser(&mut state) {
        Some(cmd) if state.remaining() == 0 => Ok(cmd),
        _ => Err(vec!["Error parsing command".to_string()]),
    }
}

fn run_help() -> Vec<String> {
    vec![
        ":h - This message".to_string(),
        ":b - List all bindings (* means they are not ready, & means they are borrowed)".to_string(),
        ":f - List all environment and script functions".to_string(),
        ":t - List all registered types and their capabilities".to_string(),
        ":r binding - Release the given binding".to_string(),
        ":a bindings... - Await the given bindings or everything if unspecified".to_string(),
        ":e file - Evaluate the given script file".to_string(),
    ]
}

fn run_bindings(env: &Env, bindings: &Bindings) -> Vec<String> {
    let mut output = Vec::with_capacity(bindings.len() + 1);
    output.push(format!("{} binding(s)", bindings.len()));

    let mut names: Vec<&String> = bindings.keys().collect();
    names.sort();
    for name in names {
        let binding = &bindings[name.as_str()];
        let marker = match binding.state() {
            ooze_core::BindingState::Ready => "",
            ooze_core::BindingState::Borrowed => "&",
            ooze_core::BindingState::Pending => "*",
        };
        output.push(format!(
            "  {}: {}{}",
            name,
            marker,
            env.pretty_print(binding.ty)
        ));
    }
    output
}

fn run_functions(env: &Env) -> Vec<String> {
    let mut signatures = Vec::new();
    let mut collapsed_counts = vec![0usize; COLLAPSED_FNS.len()];

    for (name, ty) in env.functions() {
        if let Some(i) = COLLAPSED_FNS.iter().position(|&c| c == name) {
            collapsed_counts[i] += 1;
            continue;
        }
        match env.fn_signature(ty) {
            Some((input, output)) => signatures.push(format!("{}{} -> {}", name, input, output)),
            None => signatures.push(format!("{}: {}", name, env.pretty_print(ty))),
        }
    }
    signatures.sort();

    let mut output = vec![format!("{} function(s)", signatures.len())];
    for (name, count) in COLLAPSED_FNS.iter().zip(&collapsed_counts) {
        if *count > 0 {
            output.push(format!("  {} [{} overloads]", name, count));
        }
    }
    for signature in signatures {
        output.push(format!("  {}", signature));
    }
    output
}

fn run_types(env: &Env) -> Vec<String> {
    let mut names: Vec<(String, std::any::TypeId)> = env
        .native_types()
        .names
        .iter()
        .map(|(name, &id)| (name.clone(), id))
        .collect();
    names.sort_by(|a, b| a.0.cmp(&b.0));

    let mut output = vec![format!("{} type(s)", names.len())];
    for (name, id) in names {
        output.push(format!(
            "  {:20} [to_string: {}]",
            name,
            if env.to_string_resolves(id) { "Y" } else { "N" }
        ));
    }
    output
}

fn run_release(bindings: &mut Bindings, var: &str) -> Vec<String> {
    if bindings.shift_remove(var).is_some() {
        Vec::new()
    } else {
        vec![format!("Binding {} not found", var)]
    }
}

fn run_await(ex: &ExecutorRef, bindings: &mut Bindings, names: &[String]) -> Vec<String> {
    let mut output = Vec::new();
    let targets: Vec<String> = if names.is_empty() {
        bindings.keys().cloned().collect()
    } else {
        names.to_vec()
    };

    for name in targets {
        match bindings.get_mut(&name) {
            Some(binding) => {
                let values = std::mem::take(&mut binding.values);
                binding.values = values.into_iter().map(|v| v.await_ready(ex)).collect();
            }
            None => output.push(format!("Binding {} not found", name)),
        }
    }
    output
}

fn run_eval(env: &mut Env, file: &str) -> Vec<String> {
    match std::fs::read_to_string(file) {
        Ok(script) => match env.parse_scripts(&[&script]) {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        },
        Err(error) => vec![format!("Could not read file {}: {}", file, error)],
    }
}

/// Executes one REPL line: meta-commands start with `:`, everything else
/// is evaluated and rendered to a string.
pub fn step_repl(
    ex: &ExecutorRef,
    env: &mut Env,
    bindings: &mut Bindings,
    line: &str,
) -> Vec<String> {
    if line.is_empty() {
        return Vec::new();
    }

    if let Some(command_text) = line.strip_prefix(':') {
        return match parse_command(command_text) {
            Ok(Command::Help) => run_help(),
            Ok(Command::Bindings) => run_bindings(env, bindings),
            Ok(Command::Functions) => run_functions(env),
            Ok(Command::Types) => run_types(env),
            Ok(Command::Release(var)) => run_release(bindings, &var),
            Ok(Command::Await(names)) => run_await(ex, bindings, &names),
            Ok(Command::Eval(file)) => run_eval(env, &file),
            Err(errors) => errors,
        };
    }

    match env.run_to_string(ex, bindings, line) {
        Ok(output) if output.is_empty() => Vec::new(),
        Ok(output) => vec![output],
        Err(errors) => errors,
    }
}

/// Reads lines until EOF, evaluating each through [`step_repl`].
pub fn run_repl(ex: &ExecutorRef, env: &mut Env, bindings: &mut Bindings) {
    println!("Welcome to the ooze repl!");
    println!("Try :h for help. Use Ctrl^D to exit.");
    print!("> ");
    let _ = std::io::stdout().flush();

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        for output in step_repl(ex, env, bindings, &line) {
            println!("{}", output);
        }
        print!("> ");
        let _ = std::io::stdout().flush();
    }
}

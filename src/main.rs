use clap::{arg, command, value_parser, Command};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

use ooze::repl::run_repl;
use ooze_core::{Bindings, Env};
use ooze_runtime::{make_task_executor, ExecutorRef};

fn read_scripts(files: &[PathBuf]) -> Result<Vec<String>, Vec<String>> {
    let mut scripts = Vec::new();
    let mut errors = Vec::new();
    for file in files {
        match std::fs::read_to_string(file) {
            Ok(script) => scripts.push(script),
            Err(error) => errors.push(format!("Could not read file {}: {}", file.display(), error)),
        }
    }
    if errors.is_empty() {
        Ok(scripts)
    } else {
        Err(errors)
    }
}

fn parse_scripts(env: &mut Env, files: &[PathBuf]) -> Result<(), Vec<String>> {
    let scripts = read_scripts(files)?;
    let refs: Vec<&str> = scripts.iter().map(String::as_str).collect();
    stacker::grow(32 * 1024 * 1024, || env.parse_scripts(&refs))
}

fn run_main(ex: &ExecutorRef, env: &mut Env, files: &[PathBuf]) -> ExitCode {
    if let Err(errors) = parse_scripts(env, files) {
        for line in errors {
            eprintln!("{}", line.bright_red());
        }
        return ExitCode::FAILURE;
    }

    let mut bindings = Bindings::new();
    match env.run_to_string(ex, &mut bindings, "main()") {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(errors) => {
            for line in errors {
                eprintln!("{}", line.bright_red());
            }
            ExitCode::FAILURE
        }
    }
}

fn run_repl_session(ex: &ExecutorRef, env: &mut Env, files: &[PathBuf]) -> ExitCode {
    if let Err(errors) = parse_scripts(env, files) {
        for line in errors {
            eprintln!("{}", line.bright_red());
        }
        return ExitCode::FAILURE;
    }

    let mut bindings = Bindings::new();
    run_repl(ex, env, &mut bindings);
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let matches = command!()
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Parse the given scripts and evaluate main()")
                .arg(
                    arg!([scripts] "Script files to parse")
                        .num_args(0..)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("repl")
                .about("Parse the given scripts and start an interactive session")
                .arg(
                    arg!([scripts] "Script files to parse")
                        .num_args(0..)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .get_matches_from(wild::args());

    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let executor = make_task_executor(threads);
    let mut env = ooze_builtin::create_primitive_env();

    match matches.subcommand() {
        Some(("run", args)) => {
            let files: Vec<PathBuf> = args
                .get_many::<PathBuf>("scripts")
                .map(|files| files.cloned().collect())
                .unwrap_or_default();
            run_main(&executor, &mut env, &files)
        }
        Some(("repl", args)) => {
            let files: Vec<PathBuf> = args
                .get_many::<PathBuf>("scripts")
                .map(|files| files.cloned().collect())
                .unwrap_or_default();
            run_repl_session(&executor, &mut env, &files)
        }
        _ => unreachable!(),
    }
}

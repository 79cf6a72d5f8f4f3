/*

RemTest command line
====================

Copyright (c) 2026 RemTest contributors
MIT licenced
https://github.com/remtest/remtest-rs

*/

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use glob::Pattern;
use tracing_subscriber::EnvFilter;

use remtest::harness::checks::CheckRegistry;
use remtest::harness::testfile::{self, Interpreter, TestCommand};
use remtest::harness::{RunOutcome, Runner, RunnerOptions, SessionFormat};

#[derive(Parser)]
#[command(name = "remtest")]
#[command(about = "Run regression tests against an IF interpreter")]
#[command(version)]
struct Cli {
    /// Test file to run
    testfile: PathBuf,

    /// Glob patterns selecting tests (default: all of them)
    patterns: Vec<String>,

    /// Game file to test
    #[arg(short = 'g', long)]
    game: Option<String>,

    /// Interpreter to execute, with its arguments
    #[arg(short = 'i', long, visible_alias = "terp")]
    interpreter: Option<String>,

    /// List matching tests instead of running them
    #[arg(short = 'l', long)]
    list: bool,

    /// Extra command to execute before each test (repeatable)
    #[arg(short = 'p', long = "pre", visible_alias = "precommand")]
    pre: Vec<String>,

    /// Extension check class to register (repeatable)
    #[arg(long)]
    checkclass: Vec<String>,

    /// How to talk to the interpreter
    #[arg(short = 'f', long, value_enum)]
    format: Option<FormatArg>,

    /// The interpreter uses the RemGlk (JSON) format
    #[arg(short = 'r', long)]
    rem: bool,

    /// Environment override for the interpreter (repeatable)
    #[arg(long = "env", value_name = "KEY=VAL")]
    env: Vec<String>,

    /// Per-read timeout in seconds
    #[arg(long, default_value_t = 1.0)]
    timeout: f64,

    /// Abort a test on a failed check; give twice to abort the whole run
    #[arg(long, action = ArgAction::Count)]
    vital: u8,

    /// Show transcripts as they run; give twice to trace protocol traffic
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Cheap,
    Rem,
    Remsingle,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("remtest: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let src = fs::read_to_string(&cli.testfile)
        .with_context(|| format!("cannot read test file {}", cli.testfile.display()))?;

    let mut registry = CheckRegistry::default();
    for name in &cli.checkclass {
        register_extension(&mut registry, name)?;
    }
    let mut file = testfile::parse_str(&src, &registry)
        .with_context(|| format!("cannot parse {}", cli.testfile.display()))?;
    for name in &file.checkclasses {
        register_extension(&mut registry, name)?;
    }

    let patterns = if cli.patterns.is_empty() {
        vec![Pattern::new("*").expect("the universal pattern")]
    } else {
        cli.patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).with_context(|| format!("bad test pattern {pattern}"))
            })
            .collect::<Result<_>>()?
    };
    let selected: Vec<usize> = file
        .tests
        .iter()
        .enumerate()
        .filter(|(_, test)| patterns.iter().any(|pattern| pattern.matches(&test.name)))
        .map(|(ix, _)| ix)
        .collect();

    if cli.list {
        for &ix in &selected {
            println!("{}", file.tests[ix].name);
        }
        return Ok(ExitCode::SUCCESS);
    }

    if cli.game.is_none() && file.gamefile.is_none() {
        bail!("no game file specified");
    }
    if cli.interpreter.is_none() && file.interpreter.is_none() {
        bail!("no interpreter specified");
    }

    // File-level precommands first, then the command line's
    let mut precommands = std::mem::take(&mut file.precommands);
    for pre in &cli.pre {
        precommands.push(TestCommand {
            cmd: testfile::parse_command(pre, 0)
                .with_context(|| format!("bad precommand {pre}"))?,
            checks: Vec::new(),
        });
    }

    let mut env = Vec::new();
    for entry in &cli.env {
        let Some((key, val)) = entry.split_once('=') else {
            bail!("bad --env setting (want KEY=VAL): {entry}");
        };
        env.push((key.to_string(), val.to_string()));
    }

    let options = RunnerOptions {
        gamefile: cli.game.clone(),
        interpreter: cli
            .interpreter
            .as_deref()
            .map(parse_interpreter)
            .transpose()?,
        format: resolve_format(cli.format, cli.rem, file.remformat),
        precommands,
        env,
        timeout: Duration::from_secs_f64(cli.timeout),
        vital: cli.vital,
        verbose: cli.verbose,
    };

    let mut runner = Runner::new(&file, options);
    let mut performed = 0;
    for &ix in &selected {
        performed += 1;
        if runner.run_test(&file.tests[ix]) == RunOutcome::Abort {
            break;
        }
    }

    if performed == 0 {
        println!("No tests performed!");
    }
    let errors = runner.errors();
    if errors > 0 {
        println!();
        println!("FAILED: {errors} errors");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/** Extension checks are compiled in and registered through
 * `CheckRegistry::register`; no classes are linked into this build, so any
 * name fails here.
*/
fn register_extension(_registry: &mut CheckRegistry, name: &str) -> Result<()> {
    bail!("unknown check class: {name}");
}

fn parse_interpreter(val: &str) -> Result<Interpreter> {
    let mut parts = val.split_whitespace().map(str::to_string);
    let Some(path) = parts.next() else {
        bail!("no interpreter path in {val:?}");
    };
    Ok(Interpreter {
        path,
        args: parts.collect(),
    })
}

fn resolve_format(format: Option<FormatArg>, rem: bool, remformat: bool) -> SessionFormat {
    match format {
        Some(FormatArg::Cheap) => SessionFormat::Cheap,
        Some(FormatArg::Rem) => SessionFormat::Rem,
        Some(FormatArg::Remsingle) => SessionFormat::RemSingle,
        None if rem || remformat => SessionFormat::Rem,
        None => SessionFormat::Cheap,
    }
}

fn init_tracing(verbose: u8) {
    let fallback = if verbose >= 2 { "remtest=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

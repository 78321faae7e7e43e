//! Command-line interface for grammarlab
//! Runs a grammar through the workflow for one runtime and reports results and
//! diagnoses as they arrive.
//!
//! Usage:
//!   grammarlab `<grammar>...` --runtime `<id>` [--text `<file>`] [--root `<rule>`]   - Run the workflow
//!   grammarlab --list-runtimes                                                  - List configured runtimes
//!
//! Exit codes: 0 on success, 1 when the final state has errors, 2 on usage or
//! configuration problems, 130 when interrupted.

use clap::{Arg, ArgAction, ArgMatches, Command};
use grammarlab_config::{GrammarLabConfig, Loader, LOCAL_CONFIG_FILE};
use grammarlab_core::{
    CancellationToken, GrammarProject, ParseEvent, PredictionMode, Workflow, WorkflowStage,
    WorkflowState,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const EXIT_ERRORS: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

fn command() -> Command {
    Command::new("grammarlab")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Check a grammar, generate and build its parser, and parse text with it")
        .arg_required_else_help(true)
        .arg(
            Arg::new("grammar")
                .help("Grammar files (a combined grammar, or a lexer and a parser grammar)")
                .num_args(1..)
                .value_parser(clap::value_parser!(PathBuf))
                .required_unless_present("list-runtimes")
                .index(1),
        )
        .arg(
            Arg::new("runtime")
                .long("runtime")
                .short('r')
                .help("Runtime id from the configuration")
                .default_value("java"),
        )
        .arg(
            Arg::new("text")
                .long("text")
                .short('t')
                .help("File to parse with the generated parser")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("root")
                .long("root")
                .help("Parser rule to start from (default: the first declared rule)"),
        )
        .arg(
            Arg::new("tokenize-only")
                .long("tokenize-only")
                .help("Only run the lexer on the text")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("prediction-mode")
                .long("prediction-mode")
                .help("Prediction mode: ll, sll or fastll (default from configuration)")
                .value_parser(|value: &str| value.parse::<PredictionMode>()),
        )
        .arg(
            Arg::new("end-stage")
                .long("end-stage")
                .help("Last stage to run: grammar-checked, parser-generated, parser-compiled or text-parsed")
                .value_parser(|value: &str| value.parse::<WorkflowStage>()),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Configuration file layered over the defaults")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print diagnoses as JSON instead of streaming results")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-runtimes")
                .long("list-runtimes")
                .help("List configured runtimes")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Log workflow progress to stderr")
                .action(ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() {
    let matches = command().get_matches();
    init_tracing(matches.get_flag("verbose"));
    std::process::exit(run(&matches).await);
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(matches: &ArgMatches) -> i32 {
    let config = match load_config(matches) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Configuration error: {}", message);
            return EXIT_USAGE;
        }
    };

    if matches.get_flag("list-runtimes") {
        handle_list_runtimes_command(&config);
        return 0;
    }

    let workflow = match build_workflow(matches, &config) {
        Ok(workflow) => workflow,
        Err(message) => {
            eprintln!("{}", message);
            return EXIT_USAGE;
        }
    };
    handle_run_command(&workflow, matches.get_flag("json")).await
}

fn load_config(matches: &ArgMatches) -> Result<GrammarLabConfig, String> {
    let mut loader = Loader::new().with_optional_file(LOCAL_CONFIG_FILE);
    if let Some(path) = matches.get_one::<PathBuf>("config") {
        loader = loader.with_file(path);
    }
    loader.build().map_err(|err| err.to_string())
}

fn build_workflow(matches: &ArgMatches, config: &GrammarLabConfig) -> Result<Workflow, String> {
    let runtime_id = matches
        .get_one::<String>("runtime")
        .map(String::as_str)
        .unwrap_or("java");
    let runtime = config.runtime(runtime_id).cloned().ok_or_else(|| {
        let known: Vec<&str> = config.runtime_ids().collect();
        format!(
            "Unknown runtime '{}'. Available runtimes: {}",
            runtime_id,
            known.join(", ")
        )
    })?;

    let grammars: Vec<PathBuf> = matches
        .get_many::<PathBuf>("grammar")
        .map(|paths| paths.cloned().collect())
        .unwrap_or_default();
    let project = GrammarProject::load(&grammars)
        .map_err(|err| format!("Cannot read grammar: {}", err))?;
    debug!(grammar = project.name(), runtime = %runtime.id, "loaded grammar");

    let mut builder = Workflow::builder(project, runtime)
        .workspace(config.workspace.clone())
        .generator(config.generator.clone())
        .tokenize_only(matches.get_flag("tokenize-only"))
        .prediction_mode(
            matches
                .get_one::<PredictionMode>("prediction-mode")
                .copied()
                .unwrap_or(config.parsing.prediction_mode),
        );
    if let Some(text) = matches.get_one::<PathBuf>("text") {
        builder = builder.text(text);
    }
    if let Some(root) = matches.get_one::<String>("root") {
        builder = builder.root(root);
    }
    if let Some(stage) = matches.get_one::<WorkflowStage>("end-stage") {
        builder = builder.end_stage(*stage);
    }
    Ok(builder.build())
}

/// Handle the list-runtimes command
fn handle_list_runtimes_command(config: &GrammarLabConfig) {
    println!("Available runtimes:\n");
    for (id, runtime) in &config.runtimes {
        println!("  {}", id);
        println!("    {} (generator language {})", runtime.name, runtime.language);
        println!();
    }
}

/// Handle a workflow run
async fn handle_run_command(workflow: &Workflow, json: bool) -> i32 {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted");
                cancel.cancel();
            }
        });
    }

    let (sender, receiver) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(receiver, json));
    let result = workflow.process(&cancel, Some(sender)).await;
    // The workflow dropped its sender, so the printer drains and stops
    let _ = printer.await;

    let state = match result {
        Ok(state) => state,
        Err(cancelled) => {
            eprintln!("{}", cancelled);
            return EXIT_INTERRUPTED;
        }
    };

    if json {
        match serde_json::to_string_pretty(&state.all_diagnoses()) {
            Ok(text) => println!("{}", text),
            Err(err) => {
                eprintln!("Error formatting diagnoses: {}", err);
                return EXIT_USAGE;
            }
        }
    } else {
        print_summary(&state);
    }

    if state.has_errors() {
        EXIT_ERRORS
    } else {
        0
    }
}

async fn print_events(mut receiver: mpsc::UnboundedReceiver<ParseEvent>, quiet: bool) {
    while let Some(event) = receiver.recv().await {
        if quiet {
            continue;
        }
        match event {
            ParseEvent::LexerTime(duration) => println!("Lexer time: {:?}", duration),
            ParseEvent::ParserTime(duration) => println!("Parser time: {:?}", duration),
            ParseEvent::Tokens(tokens) => println!("Tokens: {}", tokens),
            ParseEvent::Tree(tree) => println!("Tree:\n{}", tree),
            ParseEvent::Diagnosis(diagnosis) => eprintln!("{}", diagnosis),
        }
    }
}

fn print_summary(state: &Arc<WorkflowState>) {
    // Stage exceptions are recorded without an event
    let mut failed: Vec<_> = state
        .ancestors()
        .filter_map(|node| node.exception().map(|error| (node.stage(), error)))
        .collect();
    failed.reverse();
    for (stage, error) in failed {
        eprintln!("{}; {}", stage, error);
    }
    if let Some(command) = state.command() {
        debug!(command, "last command");
    }

    let errors = state
        .all_diagnoses()
        .into_iter()
        .filter(|diagnosis| diagnosis.is_error())
        .count();
    println!(
        "{}: {}",
        state.stage(),
        if errors == 0 {
            "ok".to_string()
        } else {
            format!("{} error(s)", errors)
        }
    );
}

//! Text parsing against scripted child processes
//!
//! Each test writes a small `sh` script that plays the part of a generated
//! parser entry point and runs it through the TextParsed stage.

#![cfg(unix)]

use grammarlab_core::diagnosis::{Cancelled, DiagnosisKind, StageError};
use grammarlab_core::grammar::RuleTable;
use grammarlab_core::protocol::{OutputTag, ParseEvent};
use grammarlab_core::runtime::{
    ExecutableKind, IgnoredLines, LinePattern, PredictionMode, RuntimeDescriptor,
    WorkspaceSettings,
};
use grammarlab_core::stages::parse::{parse_text, ParseParams, ParseRequest};
use grammarlab_core::workflow::{
    GrammarCheckedArtifacts, ParserCompiledArtifacts, ParserGeneratedArtifacts, StageOutcome,
    StateRef, TextParsedArtifacts, WorkflowStage, WorkflowState,
};
use grammarlab_core::{CancellationToken, GrammarProject, Source};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

const INPUT: &str = "a = 1;\nb = 2;\nx = (foo);\n";

fn runtime(dir: &Path, script: &str) -> RuntimeDescriptor {
    fs::write(dir.join("parser.sh"), script).unwrap();
    RuntimeDescriptor {
        id: "sh".into(),
        name: "Shell".into(),
        executable: ExecutableKind::Hosted,
        tool: Some("sh".into()),
        main_file: "parser.sh".into(),
        environment: BTreeMap::new(),
        ignored_lines: IgnoredLines::default(),
        arguments: vec!["{main_file}".into()],
        language: "Shell".into(),
        extensions: vec!["sh".into()],
        comment_start: "/*".into(),
        comment_end: "*/".into(),
        entry_template: None,
        error_pattern: None,
        compiler: None,
    }
}

fn compiled(dir: &Path) -> StateRef<ParserCompiledArtifacts> {
    let input = WorkflowState::input(GrammarProject::from_sources(vec![Source::shared(
        "Expr.g4",
        "grammar Expr;\nexpr : stat+ ;\nstat : ID '=' ID ';' ;\n",
    )]));
    let checked = WorkflowState::derive(
        &input,
        GrammarCheckedArtifacts {
            grammar_name: "Expr".into(),
            parser_rules: vec!["expr".into(), "stat".into()],
            ..GrammarCheckedArtifacts::default()
        },
        StageOutcome::default(),
    );
    let generated = WorkflowState::derive(
        &checked,
        ParserGeneratedArtifacts {
            runtime: "sh".into(),
            working_dir: dir.to_path_buf(),
            ..ParserGeneratedArtifacts::default()
        },
        StageOutcome::default(),
    );
    WorkflowState::derive(
        &generated,
        ParserCompiledArtifacts {
            runtime: "sh".into(),
            working_dir: dir.to_path_buf(),
            rules: RuleTable::from_rules(["expr", "stat"]),
            entry_point: None,
        },
        StageOutcome::default(),
    )
}

fn input_file(dir: &Path) -> PathBuf {
    let path = dir.join("input.txt");
    fs::write(&path, INPUT).unwrap();
    path
}

struct Run {
    state: StateRef<TextParsedArtifacts>,
    events: Vec<ParseEvent>,
}

async fn run(
    dir: &Path,
    runtime: &RuntimeDescriptor,
    params: ParseParams,
) -> Result<Run, Cancelled> {
    run_with(dir, runtime, params, &CancellationToken::new()).await
}

async fn run_with(
    dir: &Path,
    runtime: &RuntimeDescriptor,
    params: ParseParams,
    cancel: &CancellationToken,
) -> Result<Run, Cancelled> {
    let compiled = compiled(dir);
    let workspace = WorkspaceSettings::default();
    let request = ParseRequest {
        runtime,
        workspace: &workspace,
        params: &params,
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let state = parse_text(&compiled, &request, cancel, Some(&tx)).await?;
    drop(tx);
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    Ok(Run { state, events })
}

fn params(text: &Path) -> ParseParams {
    ParseParams {
        text_path: Some(text.to_path_buf()),
        ..ParseParams::default()
    }
}

#[tokio::test]
async fn tagged_output_and_located_errors() {
    let dir = TempDir::new().unwrap();
    let runtime = runtime(
        dir.path(),
        r#"cat <<'EOF'
LexerTime 00:00:00.0012345
Tokens ID(x) PLUS ID(y) EOF
Tree (expr\n  'x'\n  '+'\n  'y'\n)
EOF
echo "line 3:5 mismatched input 'foo' expecting ID" >&2
"#,
    );
    let text = input_file(dir.path());

    let run = run(dir.path(), &runtime, params(&text)).await.unwrap();
    let artifacts = run.state.artifacts();

    assert_eq!(artifacts.lexer_time, Some(Duration::from_nanos(1_234_500)));
    assert_eq!(artifacts.tokens.as_deref(), Some("ID(x) PLUS ID(y) EOF"));
    assert_eq!(
        artifacts.tree.as_deref(),
        Some("(expr\n  'x'\n  '+'\n  'y'\n)")
    );
    assert_eq!(artifacts.root.as_deref(), Some("expr"));

    let diagnoses = run.state.state().diagnoses();
    assert_eq!(diagnoses.len(), 1);
    let diagnosis = &diagnoses[0];
    assert_eq!(diagnosis.message, "mismatched input 'foo' expecting ID");
    assert_eq!(diagnosis.kind, DiagnosisKind::ChildProcessDiagnostic);
    assert_eq!(diagnosis.stage, WorkflowStage::TextParsed);
    let span = diagnosis.text_span.as_ref().unwrap();
    assert_eq!(span.start(), 19);
    assert_eq!(span.text(), "foo");
    assert_eq!(span.line_column().begin.column, 6);
    assert!(run.state.has_errors());

    let tags: Vec<_> = run.events.iter().filter_map(ParseEvent::tag).collect();
    assert_eq!(
        tags,
        vec![OutputTag::LexerTime, OutputTag::Tokens, OutputTag::Tree]
    );
    assert!(run
        .events
        .iter()
        .any(|event| *event == ParseEvent::Diagnosis(diagnosis.clone())));
}

#[tokio::test]
async fn child_receives_positional_arguments() {
    let dir = TempDir::new().unwrap();
    let runtime = runtime(
        dir.path(),
        r#"echo "Tokens $1 $3 $4"
case "$2" in
  /*) [ -f "$2" ] && echo "Tree absolute" ;;
esac
"#,
    );
    let text = input_file(dir.path());
    let params = ParseParams {
        root: Some("stat".into()),
        tokenize_only: true,
        prediction_mode: PredictionMode::Sll,
        ..params(&text)
    };

    let run = run(dir.path(), &runtime, params).await.unwrap();
    let artifacts = run.state.artifacts();
    assert_eq!(artifacts.tokens.as_deref(), Some("stat true sll"));
    assert_eq!(artifacts.tree.as_deref(), Some("absolute"));
    assert!(!run.state.has_errors(), "{:?}", run.state.state().diagnoses());

    let command = run.state.state().command().unwrap();
    assert!(command.starts_with("sh parser.sh stat "), "{}", command);
    assert!(command.ends_with(" true sll"), "{}", command);
}

#[tokio::test]
async fn untagged_lines_are_kept_in_stream_order() {
    let dir = TempDir::new().unwrap();
    let runtime = runtime(
        dir.path(),
        r#"echo "first stdout"
echo "first stderr" >&2
echo "second stdout"
echo "second stderr" >&2
"#,
    );
    let text = input_file(dir.path());

    let run = run(dir.path(), &runtime, params(&text)).await.unwrap();
    let messages: Vec<_> = run
        .state
        .state()
        .diagnoses()
        .iter()
        .map(|d| d.message.as_str())
        .collect();
    assert_eq!(messages.len(), 4);

    let order = |a: &str, b: &str| {
        messages.iter().position(|m| *m == a).unwrap()
            < messages.iter().position(|m| *m == b).unwrap()
    };
    assert!(order("first stdout", "second stdout"));
    assert!(order("first stderr", "second stderr"));
    assert!(run
        .state
        .state()
        .diagnoses()
        .iter()
        .all(|d| d.kind == DiagnosisKind::UnparsedOutputLine && d.text_span.is_none()));
}

#[tokio::test]
async fn ignored_lines_are_dropped() {
    let dir = TempDir::new().unwrap();
    let mut runtime = runtime(
        dir.path(),
        r#"echo "Picked up _JAVA_OPTIONS: -Xmx1g" >&2
echo "Picked up JAVA_TOOL_OPTIONS"
echo "Tokens EOF"
"#,
    );
    runtime.ignored_lines = IgnoredLines::new(vec![LinePattern::new("^Picked up ").unwrap()]);
    let text = input_file(dir.path());

    let run = run(dir.path(), &runtime, params(&text)).await.unwrap();
    assert!(run.state.state().diagnoses().is_empty());
    assert_eq!(run.state.artifacts().tokens.as_deref(), Some("EOF"));
    assert_eq!(run.events.len(), 1);
}

#[tokio::test]
async fn missing_text_never_spawns() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("spawned");
    let runtime = runtime(dir.path(), &format!("touch '{}'\n", marker.display()));

    let run = run(dir.path(), &runtime, ParseParams::default())
        .await
        .unwrap();
    let diagnoses = run.state.state().diagnoses();
    assert_eq!(diagnoses.len(), 1);
    assert_eq!(diagnoses[0].message, "File to parse is not specified");
    assert!(run.state.state().command().is_none());
    assert!(!marker.exists());
}

#[tokio::test]
async fn unknown_root_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let runtime = runtime(dir.path(), "echo 'Tokens EOF'\n");
    let text = input_file(dir.path());
    let params = ParseParams {
        root: Some("missing".into()),
        ..params(&text)
    };

    let run = run(dir.path(), &runtime, params).await.unwrap();
    let state = run.state.state();
    assert!(matches!(state.exception(), Some(StageError::Configuration(_))));
    assert_eq!(state.diagnoses()[0].kind, DiagnosisKind::ConfigurationError);
    assert!(state.command().is_none());
}

#[tokio::test]
async fn spawn_failure_is_recorded() {
    let dir = TempDir::new().unwrap();
    let mut runtime = runtime(dir.path(), "");
    runtime.tool = Some("grammarlab-missing-tool".into());
    let text = input_file(dir.path());

    let run = run(dir.path(), &runtime, params(&text)).await.unwrap();
    let state = run.state.state();
    assert!(state.has_errors());
    assert!(matches!(state.exception(), Some(StageError::ProcessSpawn { .. })));
    assert_eq!(state.diagnoses().len(), 1);
    assert_eq!(state.diagnoses()[0].kind, DiagnosisKind::ProcessSpawnFailure);
}

#[tokio::test]
async fn silent_failure_exit_is_an_error() {
    let dir = TempDir::new().unwrap();
    let runtime = runtime(dir.path(), "echo 'Tokens EOF'\nexit 3\n");
    let text = input_file(dir.path());

    let run = run(dir.path(), &runtime, params(&text)).await.unwrap();
    let diagnoses = run.state.state().diagnoses();
    assert_eq!(diagnoses.len(), 1);
    assert_eq!(diagnoses[0].kind, DiagnosisKind::AbnormalExit);
    assert!(run.state.has_errors());
}

#[tokio::test]
async fn environment_is_scoped_to_the_child() {
    let dir = TempDir::new().unwrap();
    let mut runtime = runtime(dir.path(), "echo \"Tokens $GRAMMARLAB_SCOPED\"\n");
    runtime
        .environment
        .insert("GRAMMARLAB_SCOPED".into(), "child-only".into());
    let text = input_file(dir.path());

    let run = run(dir.path(), &runtime, params(&text)).await.unwrap();
    assert_eq!(run.state.artifacts().tokens.as_deref(), Some("child-only"));
    assert!(std::env::var("GRAMMARLAB_SCOPED").is_err());

    let sibling = self::runtime(dir.path(), "echo \"Tokens [$GRAMMARLAB_SCOPED]\"\n");
    let run = self::run(dir.path(), &sibling, params(&text)).await.unwrap();
    assert_eq!(run.state.artifacts().tokens.as_deref(), Some("[]"));
}

#[tokio::test]
async fn cancellation_kills_the_child() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("pid");
    let mut runtime = runtime(dir.path(), "echo $$ > \"$PID_FILE\"\nexec sleep 30\n");
    runtime
        .environment
        .insert("PID_FILE".into(), pid_file.display().to_string());
    let text = input_file(dir.path());
    let cancel = CancellationToken::new();

    let trigger = async {
        let pid = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Ok(pid) = fs::read_to_string(&pid_file) {
                    if let Ok(pid) = pid.trim().parse::<u32>() {
                        return pid;
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("child to start");
        cancel.cancel();
        pid
    };
    let (result, pid) = tokio::join!(
        run_with(dir.path(), &runtime, params(&text), &cancel),
        trigger
    );

    assert!(matches!(result, Err(Cancelled)));
    let alive = std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap();
    assert!(!alive.success(), "process {} still running", pid);
}

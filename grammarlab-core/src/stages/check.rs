//! Input -> GrammarChecked
//!
//! Grammar syntax checking belongs to a [`GrammarChecker`]; this stage only
//! records what it reports. [`DeclaredRulesChecker`] is a lightweight checker
//! that finds declarations without parsing the full grammar language, enough to
//! drive the rest of the workflow from the command line.

use crate::diagnosis::{Cancelled, Diagnosis, DiagnosisKind, Severity};
use crate::grammar::GrammarProject;
use crate::process::CancellationToken;
use crate::protocol::{notify, EventSender, ParseEvent};
use crate::source::{Source, TextSpan};
use crate::workflow::{
    GrammarCheckedArtifacts, InputArtifacts, StageOutcome, StateRef, WorkflowStage, WorkflowState,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

const STAGE: WorkflowStage = WorkflowStage::GrammarChecked;

/// What a grammar checker found
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    /// Declared grammar name, without a `Lexer`/`Parser` suffix
    pub grammar_name: Option<String>,
    pub parser_rules: Vec<String>,
    pub lexer_rules: Vec<String>,
    /// Embedded action and predicate blocks, sorted per source
    pub fragments: Vec<TextSpan>,
    pub diagnoses: Vec<Diagnosis>,
}

pub trait GrammarChecker: Send + Sync {
    fn check(&self, project: &GrammarProject) -> CheckReport;
}

pub fn check_grammar(
    input: &StateRef<InputArtifacts>,
    checker: &dyn GrammarChecker,
    cancel: &CancellationToken,
    events: Option<&EventSender>,
) -> Result<StateRef<GrammarCheckedArtifacts>, Cancelled> {
    if cancel.is_cancelled() {
        return Err(Cancelled);
    }

    let project = &input.artifacts().project;
    let report = checker.check(project);

    let mut outcome = StageOutcome::default();
    for mut diagnosis in report.diagnoses {
        diagnosis.stage = STAGE;
        notify(events, ParseEvent::Diagnosis(diagnosis.clone()));
        outcome.push(diagnosis);
    }

    let artifacts = GrammarCheckedArtifacts {
        grammar_name: report
            .grammar_name
            .unwrap_or_else(|| project.name().to_string()),
        parser_rules: report.parser_rules,
        lexer_rules: report.lexer_rules,
        fragments: report.fragments,
    };
    Ok(WorkflowState::derive(input, artifacts, outcome))
}

static GRAMMAR_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:(?P<kind>lexer|parser)\s+)?grammar\s+(?P<name>[A-Za-z_]\w*)\s*;")
        .expect("grammar declaration pattern is valid")
});

static RULE_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?P<modifier>(?:public|private|protected|fragment)\s+)?(?P<name>[A-Za-z_]\w*)\s*(?:returns\s*)?(?:locals\s*)?:",
    )
    .expect("rule declaration pattern is valid")
});

const BLOCK_KEYWORDS: [&str; 3] = ["options", "tokens", "channels"];

/// Finds grammar and rule declarations by pattern
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredRulesChecker;

impl GrammarChecker for DeclaredRulesChecker {
    fn check(&self, project: &GrammarProject) -> CheckReport {
        let mut report = CheckReport::default();
        let mut seen = HashSet::new();

        for source in project.sources() {
            let scanned = Scanned::new(source.text());

            match GRAMMAR_DECLARATION.captures(&scanned.masked) {
                Some(caps) => {
                    if report.grammar_name.is_none() {
                        let name = &caps["name"];
                        let base = match caps.name("kind").map(|k| k.as_str()) {
                            Some("lexer") => name.strip_suffix("Lexer"),
                            Some("parser") => name.strip_suffix("Parser"),
                            _ => None,
                        };
                        report.grammar_name =
                            Some(base.filter(|b| !b.is_empty()).unwrap_or(name).to_string());
                    }
                }
                None => report.diagnoses.push(
                    Diagnosis::located(
                        TextSpan::new(0, 0, Arc::clone(source)),
                        "Grammar declaration is missing",
                        Severity::Error,
                        STAGE,
                    )
                    .with_kind(DiagnosisKind::GrammarCheck),
                ),
            }

            for caps in RULE_DECLARATION.captures_iter(&scanned.masked) {
                let Some(name) = caps.name("name") else {
                    continue;
                };
                let rule = name.as_str();
                if rule == "grammar" || BLOCK_KEYWORDS.contains(&rule) {
                    continue;
                }
                if !seen.insert(rule.to_string()) {
                    let start = scanned.char_offset(name.start());
                    report.diagnoses.push(
                        Diagnosis::located(
                            TextSpan::new(start, rule.chars().count(), Arc::clone(source)),
                            format!("Rule '{}' is already declared", rule),
                            Severity::Error,
                            STAGE,
                        )
                        .with_kind(DiagnosisKind::GrammarCheck),
                    );
                    continue;
                }
                let is_fragment = caps
                    .name("modifier")
                    .is_some_and(|m| m.as_str().trim() == "fragment");
                if rule.starts_with(|c: char| c.is_ascii_uppercase()) {
                    if !is_fragment {
                        report.lexer_rules.push(rule.to_string());
                    }
                } else {
                    report.parser_rules.push(rule.to_string());
                }
            }

            report.fragments.extend(
                scanned
                    .actions
                    .iter()
                    .map(|&(start, end)| TextSpan::new(start, end - start, Arc::clone(source))),
            );
        }

        report
    }
}

/// Grammar text with comments, literals, charsets and blocks blanked out.
///
/// Blanking keeps every character offset and line break in place, so matches on
/// the masked text are positions in the original.
struct Scanned {
    masked: String,
    /// `[start, end)` character ranges of action block bodies, braces excluded
    actions: Vec<(usize, usize)>,
}

impl Scanned {
    fn new(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let mut masked = chars.clone();
        let mut actions = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            let end = match (chars[i], chars.get(i + 1).copied()) {
                ('/', Some('/')) => find_from(&chars, i, &['\n']).unwrap_or(chars.len()),
                ('/', Some('*')) => find_pair(&chars, i + 2, '*', '/').unwrap_or(chars.len()),
                ('\'', _) => skip_quoted(&chars, i, '\''),
                ('[', _) => skip_quoted(&chars, i, ']'),
                ('{', _) => {
                    let end = matching_brace(&chars, i);
                    if !preceded_by_keyword(&masked, i) {
                        let body_end = if chars[end - 1] == '}' {
                            end - 1
                        } else {
                            end
                        };
                        actions.push((i + 1, body_end.max(i + 1)));
                    }
                    end
                }
                _ => {
                    i += 1;
                    continue;
                }
            };
            for ch in &mut masked[i..end] {
                if !matches!(*ch, '\n' | '\r') {
                    *ch = ' ';
                }
            }
            i = end;
        }

        Self {
            masked: masked.into_iter().collect(),
            actions,
        }
    }

    fn char_offset(&self, byte_offset: usize) -> usize {
        self.masked[..byte_offset].chars().count()
    }
}

fn find_from(chars: &[char], start: usize, targets: &[char]) -> Option<usize> {
    (start..chars.len()).find(|&j| targets.contains(&chars[j]))
}

/// Offset just past the first `first second` pair at or after `start`.
fn find_pair(chars: &[char], start: usize, first: char, second: char) -> Option<usize> {
    (start..chars.len().saturating_sub(1))
        .find(|&j| chars[j] == first && chars[j + 1] == second)
        .map(|j| j + 2)
}

/// Offset just past the closing delimiter of a literal opened at `start`.
fn skip_quoted(chars: &[char], start: usize, close: char) -> usize {
    let mut j = start + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            ch if ch == close => return j + 1,
            _ => j += 1,
        }
    }
    chars.len()
}

fn matching_brace(chars: &[char], start: usize) -> usize {
    let mut depth = 0usize;
    let mut j = start;
    while j < chars.len() {
        match chars[j] {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return j + 1;
                }
            }
            '/' if chars.get(j + 1) == Some(&'/') => {
                j = find_from(chars, j, &['\n']).unwrap_or(chars.len());
                continue;
            }
            '/' if chars.get(j + 1) == Some(&'*') => {
                j = find_pair(chars, j + 2, '*', '/').unwrap_or(chars.len());
                continue;
            }
            quote @ ('\'' | '"') => {
                j = skip_quoted(chars, j, quote);
                continue;
            }
            _ => {}
        }
        j += 1;
    }
    chars.len()
}

fn preceded_by_keyword(masked: &[char], brace: usize) -> bool {
    let before: String = masked[..brace].iter().collect();
    let word: String = before
        .trim_end()
        .chars()
        .rev()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    BLOCK_KEYWORDS.contains(&word.as_str())
}

/// Check a single in-memory grammar with [`DeclaredRulesChecker`].
pub fn check_source(source: Arc<Source>) -> CheckReport {
    DeclaredRulesChecker.check(&GrammarProject::from_sources(vec![source]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPR: &str = "grammar Expr;\n\
        options { language = Java; }\n\
        // program : ignored ;\n\
        program : statement+ EOF ;\n\
        statement\n    : expr ';' {System.out.println(\"x: y\");}\n    ;\n\
        expr returns [int value] : ID | INT ;\n\
        ID : [a-zA-Z:]+ ;\n\
        fragment DIGIT : [0-9] ;\n\
        INT : DIGIT+ ;\n";

    #[test]
    fn test_declared_rules() {
        let report = check_source(Source::shared("Expr.g4", EXPR));
        assert_eq!(report.grammar_name.as_deref(), Some("Expr"));
        assert_eq!(report.parser_rules, vec!["program", "statement", "expr"]);
        assert_eq!(report.lexer_rules, vec!["ID", "INT"]);
        assert!(report.diagnoses.is_empty(), "{:?}", report.diagnoses);
    }

    #[test]
    fn test_action_fragments_exclude_option_blocks() {
        let report = check_source(Source::shared("Expr.g4", EXPR));
        let texts: Vec<String> = report.fragments.iter().map(TextSpan::text).collect();
        assert_eq!(texts, vec!["System.out.println(\"x: y\");"]);
    }

    #[test]
    fn test_comments_inside_actions_do_not_open_literals() {
        let report = check_source(Source::shared(
            "P.g4",
            "grammar P;\nprog : stat {// don't care\n} ;\nstat : ID {/* it's */} ;\nID : [a-z]+ ;\n",
        ));
        assert_eq!(report.parser_rules, vec!["prog", "stat"]);
        assert_eq!(report.lexer_rules, vec!["ID"]);
        let texts: Vec<String> = report.fragments.iter().map(TextSpan::text).collect();
        assert_eq!(texts, vec!["// don't care\n", "/* it's */"]);
    }

    #[test]
    fn test_split_grammar_name() {
        let report = check_source(Source::shared(
            "ExprParser.g4",
            "parser grammar ExprParser;\nprogram : ID ;\n",
        ));
        assert_eq!(report.grammar_name.as_deref(), Some("Expr"));
    }

    #[test]
    fn test_duplicate_rule_is_located() {
        let report = check_source(Source::shared(
            "Dup.g4",
            "grammar Dup;\na : 'x' ;\na : 'y' ;\n",
        ));
        assert_eq!(report.parser_rules, vec!["a"]);
        let diagnosis = &report.diagnoses[0];
        assert_eq!(diagnosis.message, "Rule 'a' is already declared");
        assert_eq!(
            diagnosis.text_span.as_ref().unwrap().line_column().to_string(),
            "[3,1..2)"
        );
    }

    #[test]
    fn test_missing_grammar_declaration() {
        let report = check_source(Source::shared("Bad.g4", "a : 'x' ;\n"));
        assert_eq!(report.diagnoses.len(), 1);
        assert_eq!(report.diagnoses[0].message, "Grammar declaration is missing");
        assert!(report.diagnoses[0].is_error());
    }

    #[test]
    fn test_check_stage_records_report() {
        let input = WorkflowState::input(GrammarProject::from_sources(vec![Source::shared(
            "Dup.g4",
            "grammar Dup;\na : 'x' ;\na : 'y' ;\n",
        )]));
        let checked =
            check_grammar(&input, &DeclaredRulesChecker, &CancellationToken::new(), None).unwrap();
        assert!(checked.has_errors());
        assert_eq!(checked.artifacts().grammar_name, "Dup");
        assert_eq!(checked.state().diagnoses()[0].stage, WorkflowStage::GrammarChecked);
    }

    #[test]
    fn test_check_stage_honors_cancellation() {
        let input = WorkflowState::input(GrammarProject::from_sources(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            check_grammar(&input, &DeclaredRulesChecker, &cancel, None).unwrap_err(),
            Cancelled
        );
    }
}

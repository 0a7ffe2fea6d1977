//! Envelopes and human rendering for CLI results.
//!
//! JSON mode prints one `taskpool.v1` envelope per command on stdout, failures
//! included. Human mode prints a header, an aligned summary, one line per
//! record and the suggested follow-up commands.

use serde::Serialize;

use crate::error::{Error, Result};

pub const SCHEMA_VERSION: &str = "taskpool.v1";

/// Global flags whose value must not be mistaken for the command name.
const VALUE_FLAGS: [&str; 3] = ["--root", "--as", "--events"];

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Human rendering of one command result.
#[derive(Debug, Clone, Default)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    rows: Vec<String>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            ..Self::default()
        }
    }

    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.summary.push((key.into(), value.into()));
    }

    /// One record line, usually from `describe`.
    pub fn push_detail(&mut self, row: impl Into<String>) {
        self.rows.push(row.into());
    }

    pub fn push_next_step(&mut self, command: impl Into<String>) {
        self.next_steps.push(command.into());
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: i32,
    kind: &'static str,
    retryable: bool,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    next_steps: Vec<String>,
}

impl<T: Serialize> Envelope<'_, T> {
    fn print(&self) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(self)?);
        Ok(())
    }
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        return Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            data: Some(data),
            error: None,
            next_steps: human.map(|h| h.next_steps.clone()).unwrap_or_default(),
        }
        .print();
    }

    match human {
        Some(human) if !options.quiet => println!("{}", format_human(human)),
        _ => {}
    }
    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);
    if json {
        return Envelope::<()> {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            data: None,
            error: Some(ErrorBody {
                message: err.to_string(),
                code: err.exit_code(),
                kind: err.kind(),
                retryable: err.is_retryable(),
            }),
            next_steps,
        }
        .print();
    }

    eprintln!("error: {err}");
    for step in &next_steps {
        eprintln!("  try: {step}");
    }
    Ok(())
}

pub fn format_human(output: &HumanOutput) -> String {
    let mut rendered = output.header.clone();

    let width = output
        .summary
        .iter()
        .map(|(key, _)| key.len())
        .max()
        .unwrap_or(0);
    for (key, value) in &output.summary {
        rendered.push_str(&format!("\n  {key:<width$}  {value}"));
    }

    if !output.rows.is_empty() {
        rendered.push('\n');
        for row in &output.rows {
            rendered.push_str(&format!("\n  {row}"));
        }
    }

    if !output.next_steps.is_empty() {
        rendered.push('\n');
        for step in &output.next_steps {
            rendered.push_str(&format!("\n  next: {step}"));
        }
    }

    rendered
}

/// Command name for error envelopes, read before clap parses anything.
pub fn infer_command_name_from_args() -> String {
    command_name(std::env::args().skip(1))
}

fn command_name(args: impl IntoIterator<Item = String>) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            args.next();
            continue;
        }
        if arg.starts_with('-') {
            continue;
        }
        words.push(arg);
        // `template` is the only command with subcommands.
        if words[0] != "template" || words.len() == 2 {
            break;
        }
    }

    if words.is_empty() {
        "taskpool".to_string()
    } else {
        words.join(" ")
    }
}

fn error_next_steps(err: &Error) -> Vec<String> {
    match err {
        Error::StateConflict { assignment_id, .. } => {
            vec![format!("taskpool show {assignment_id}")]
        }
        Error::SettlementFailure { assignment_id, .. } => {
            vec![format!("taskpool verify {assignment_id}")]
        }
        Error::TemplateInUse { .. } => vec![
            "taskpool list --all --status active".to_string(),
            "taskpool unassign <assignment-id>".to_string(),
            "taskpool rm <assignment-id>".to_string(),
        ],
        Error::NotFound(_) => vec!["taskpool list --all".to_string()],
        Error::InvalidConfig(_) => vec!["fix .taskpool.toml then retry".to_string()],
        Error::LockFailed(_) => vec!["retry once the other taskpool process finishes".to_string()],
        _ => Vec::new(),
    }
}

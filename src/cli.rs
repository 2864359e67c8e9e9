use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pgrun::engine::{Collaborators, Dispatcher, DispatcherConfig};
use pgrun::error::DispatchError;
use pgrun::model::{
    parse_value, DocumentSnapshot, Invocation, Selection, UnitReport, Value, Variable,
};
use pgrun::orchestrator::{spawn_foreground, OutputSink};
use pgrun::settings::{JsonFileBackend, Session, SessionId, SessionRegistry};
use pgrun::terminal::{OutputTarget, StderrStatus, TerminalConfirm, TerminalInput, TerminalSurface};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

/// The terminal is a single editor session.
const CLI_SESSION: SessionId = SessionId(1);

#[derive(Debug, Parser)]
#[command(
    name = "pgrun",
    version,
    about = "Run psql over documents, selections and SQL files with per-query timing"
)]
pub struct Cli {
    /// Settings file holding persisted defaults
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute a document, its selections, or SQL files through psql
    Run(RunArgs),
    /// Inspect or change persisted connection defaults
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Document to run; `-` reads it from stdin
    pub document: Option<PathBuf>,

    /// Selected region as START:END character offsets (repeatable)
    #[arg(long = "select", value_parser = parse_selection)]
    pub selections: Vec<Selection>,

    /// SQL file to run instead of the document (repeatable)
    #[arg(long = "file")]
    pub files: Vec<PathBuf>,

    /// Setting for this invocation only, NAME=VALUE (repeatable)
    #[arg(long = "set", value_parser = parse_assignment)]
    pub overrides: Vec<(Variable, Value)>,

    /// Session override, NAME=VALUE (repeatable)
    #[arg(long = "session", value_parser = parse_assignment)]
    pub session: Vec<(Variable, Value)>,

    /// Persist the session overrides as defaults before running
    #[arg(long)]
    pub save: bool,

    /// Text encoding of the document and of psql's output
    #[arg(long, default_value = "UTF-8")]
    pub encoding: String,

    /// Directory for output documents when output_to_newfile is set
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Print a JSON report of every unit; query output goes to stderr
    #[arg(long)]
    pub json: bool,

    /// Delay between completion checks
    #[arg(long, default_value = "25ms")]
    pub poll_interval: humantime::Duration,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show every resolvable setting
    List,
    /// Show one setting
    Get { name: String },
    /// Persist a default
    Set { name: String, value: String },
    /// Blank out a persisted default
    Clear { name: String },
}

fn parse_selection(raw: &str) -> Result<Selection, String> {
    let (a, b) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got {raw:?}"))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<usize>()
            .map_err(|e| format!("bad offset {s:?}: {e}"))
    };
    Ok(Selection::new(parse(a)?, parse(b)?))
}

fn parse_assignment(raw: &str) -> Result<(Variable, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw:?}"))?;
    let var = name.trim().parse::<Variable>().map_err(|e| e.to_string())?;
    Ok((var, parse_value(value)))
}

/// Returns whether every unit ran and exited cleanly.
pub async fn run(args: Cli) -> Result<bool> {
    let path = match args.settings.clone() {
        Some(p) => p,
        None => JsonFileBackend::default_path()
            .context("no configuration directory; pass --settings")?,
    };
    let backend = JsonFileBackend::open(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    let registry = SessionRegistry::new(Arc::new(backend));
    let session = registry.session(CLI_SESSION);

    let res = match args.command {
        Command::Run(run_args) => run_invocation(session, run_args).await,
        Command::Config { action } => run_config(&session, action).map(|()| true),
    };
    registry.close(CLI_SESSION);
    res
}

fn read_document(path: Option<&PathBuf>) -> Result<String> {
    match path {
        None => Ok(String::new()),
        Some(p) if p.as_os_str() == "-" => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read document from stdin")?;
            Ok(text)
        }
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("failed to read document {}", p.display())),
    }
}

async fn run_invocation(session: Arc<Session>, args: RunArgs) -> Result<bool> {
    let settings = session.settings();
    for (var, value) in &args.session {
        settings.set_user_specified(*var, value.clone())?;
    }
    if args.save && settings.has_user_specified() {
        settings.save().context("failed to save session overrides")?;
    }

    let mut overrides: BTreeMap<Variable, Value> = args.overrides.into_iter().collect();
    if !args.files.is_empty() {
        let files = args
            .files
            .iter()
            .map(|p| Value::String(p.to_string_lossy().into_owned()))
            .collect();
        overrides.insert(Variable::Files, Value::Array(files));
    }
    if args.document.is_none()
        && !overrides.contains_key(&Variable::Files)
        && !settings.contains(Variable::Files)?
    {
        bail!("nothing to run: pass a DOCUMENT or --file");
    }

    let invocation = Invocation {
        overrides,
        document: DocumentSnapshot {
            text: read_document(args.document.as_ref())?,
            selections: args.selections,
        },
        encoding: args.encoding,
    };

    let target = if args.json {
        OutputTarget::Stderr
    } else {
        OutputTarget::Stdout
    };
    let surface = Arc::new(TerminalSurface::new(target, args.output_dir));
    let sink = OutputSink::new(surface, session.output_lock());
    let (fg_tx, fg_handle) = spawn_foreground(sink, Arc::new(StderrStatus));

    let dispatcher = Dispatcher::new(
        session.clone(),
        Collaborators {
            input: Arc::new(TerminalInput),
            confirm: Arc::new(TerminalConfirm),
        },
        fg_tx,
        DispatcherConfig {
            poll_interval: args.poll_interval.into(),
            ..DispatcherConfig::default()
        },
    );

    let outcome = dispatcher.run(invocation).await;
    // The foreground loop ends once the dispatcher's sender is gone too.
    drop(dispatcher);
    let declined = match outcome {
        Ok(handle) => {
            handle.wait().await;
            false
        }
        Err(DispatchError::Declined) => true,
        Err(e) => return Err(e.into()),
    };

    let reports: Vec<UnitReport> = fg_handle.await.context("output loop failed")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    Ok(!declined && reports.iter().all(|r| !r.failed && r.code == 0))
}

fn run_config(session: &Session, action: ConfigAction) -> Result<()> {
    let settings = session.settings();
    match action {
        ConfigAction::List => {
            for var in Variable::ALL {
                if let Some(value) = settings.get(*var)? {
                    println!("{} = {}", var, display_value(*var, &value));
                }
            }
        }
        ConfigAction::Get { name } => {
            let var: Variable = name.parse()?;
            if let Some(value) = settings.get(var)? {
                println!("{}", display_value(var, &value));
            }
        }
        ConfigAction::Set { name, value } => {
            settings.set_user_specified(name.as_str(), parse_value(&value))?;
            settings.save().context("failed to save settings")?;
        }
        ConfigAction::Clear { name } => {
            settings.set_user_specified(name.as_str(), Value::Null)?;
            settings.save().context("failed to save settings")?;
        }
    }
    Ok(())
}

fn display_value(var: Variable, value: &Value) -> String {
    if var == Variable::Password {
        "********".to_string()
    } else {
        value.to_string()
    }
}

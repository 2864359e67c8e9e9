use crate::model::{
    env_value, is_truthy, Destination, ForegroundEvent, ProcessResult, ResolvedSettings,
    UnitSource, Variable, WorkUnit,
};
use anyhow::{bail, Context, Result};
use encoding_rs::Encoding;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::{ErrorKind, Read, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Result code reported when the client could not be run at all.
pub const FAILURE_CODE: i32 = 1;

/// Flag that stops the client from ever prompting on the terminal.
pub const NO_PASSWORD_FLAG: &str = "--no-password";

/// Everything one worker needs to run its unit and hand the result back.
#[derive(Debug, Clone)]
pub struct WorkerJob {
    pub unit: WorkUnit,
    pub label: String,
    pub settings: Arc<ResolvedSettings>,
    pub client_path: PathBuf,
    pub encoding: String,
    pub destination: Destination,
}

/// Environment for the client: `base` plus every truthy exported setting.
/// The client encoding falls back to the document encoding.
pub fn build_environment<I>(
    base: I,
    settings: &ResolvedSettings,
    encoding: &str,
) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: BTreeMap<OsString, OsString> = base.into_iter().collect();
    for (var, value) in settings.iter() {
        let name = var.env_var();
        if name.is_empty() || !is_truthy(value) {
            continue;
        }
        env.insert(name.into(), env_value(value).into());
    }
    env.entry(Variable::ClientEncoding.env_var().into())
        .or_insert_with(|| encoding.into());
    env
}

/// Encode query text for the client's stdin. encoding_rs only encodes UTF-16 as
/// UTF-8, so the two UTF-16 forms are written out here.
pub fn encode_query(encoding: &'static Encoding, text: &str) -> Result<Vec<u8>> {
    if encoding == encoding_rs::UTF_16LE {
        return Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect());
    }
    if encoding == encoding_rs::UTF_16BE {
        return Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect());
    }
    let (bytes, used, had_errors) = encoding.encode(text);
    if had_errors || used != encoding {
        bail!("query text cannot be encoded as {}", encoding.name());
    }
    Ok(bytes.into_owned())
}

fn execute(job: &WorkerJob) -> Result<(i32, String)> {
    let encoding = Encoding::for_label(job.encoding.as_bytes())
        .with_context(|| format!("unknown encoding {:?}", job.encoding))?;

    let mut cmd = Command::new(&job.client_path);
    cmd.arg(NO_PASSWORD_FLAG)
        .env_clear()
        .envs(build_environment(
            std::env::vars_os(),
            &job.settings,
            &job.encoding,
        ));

    let stdin_bytes = match &job.unit.source {
        UnitSource::File(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            cmd.stdin(Stdio::from(file));
            None
        }
        UnitSource::Query(text) => {
            cmd.stdin(Stdio::piped());
            Some(encode_query(encoding, text)?)
        }
    };

    // stdout and stderr share one pipe so the output keeps the client's own ordering.
    let (mut reader, writer) = std::io::pipe().context("failed to create output pipe")?;
    cmd.stdout(writer.try_clone().context("failed to clone output pipe")?)
        .stderr(writer);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to start {}", job.client_path.display()))?;
    // Our copies of the pipe's write end must be gone or the read below never ends.
    drop(cmd);

    let feeder = match (child.stdin.take(), stdin_bytes) {
        (Some(mut stdin), Some(bytes)) => Some(std::thread::spawn(move || {
            match stdin.write_all(&bytes) {
                Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            }
        })),
        _ => None,
    };

    let mut raw = Vec::new();
    reader
        .read_to_end(&mut raw)
        .context("failed to read client output")?;
    let status = child.wait().context("failed to wait for client")?;

    if let Some(feeder) = feeder {
        match feeder.join() {
            Ok(res) => res.context("failed to write query to client")?,
            Err(_) => bail!("query writer thread panicked"),
        }
    }

    let output = encoding
        .decode_without_bom_handling_and_without_replacement(&raw)
        .with_context(|| format!("client output is not valid {}", encoding.name()))?
        .into_owned();
    Ok((status.code().unwrap_or(FAILURE_CODE), output))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run one unit. Never fails: every error becomes a displayable result.
pub fn run_unit(job: &WorkerJob) -> ProcessResult {
    let start = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| execute(job)));
    let elapsed = start.elapsed();
    match outcome {
        Ok(Ok((code, output))) => ProcessResult {
            code,
            output,
            elapsed,
            failed: false,
        },
        Ok(Err(e)) => {
            warn!(unit = %job.label, error = %e, "client run failed");
            ProcessResult {
                code: FAILURE_CODE,
                output: format!("{e:?}\n"),
                elapsed,
                failed: true,
            }
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            warn!(unit = %job.label, panic = %msg, "client run panicked");
            ProcessResult {
                code: FAILURE_CODE,
                output: format!("worker panicked: {msg}\n"),
                elapsed,
                failed: true,
            }
        }
    }
}

/// Worker thread body: run the unit and hand the result to the foreground.
pub fn run_and_deliver(job: WorkerJob, foreground: mpsc::UnboundedSender<ForegroundEvent>) {
    let result = run_unit(&job);
    debug!(
        unit = %job.label,
        code = result.code,
        failed = result.failed,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "unit finished"
    );
    let _ = foreground.send(ForegroundEvent::Deliver {
        label: job.label,
        destination: job.destination,
        encoding: job.encoding,
        result,
    });
}

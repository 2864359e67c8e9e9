//! Terminal implementations of the host collaborators.

use crate::engine::encode_query;
use crate::surface::{ConfirmDialog, DisplaySurface, Document, InputPanel, StatusSink};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use encoding_rs::Encoding;
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, warn};

fn read_reply(prompt: &str) -> Option<String> {
    eprint!("{prompt} ");
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SecretKey {
    Continue,
    Submit,
    Cancel,
}

/// Apply one key press to a hidden line being typed.
fn apply_secret_key(buf: &mut String, key: KeyEvent) -> SecretKey {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Enter => SecretKey::Submit,
        KeyCode::Esc => SecretKey::Cancel,
        KeyCode::Char('c') if ctrl => SecretKey::Cancel,
        KeyCode::Char('d') if ctrl && buf.is_empty() => SecretKey::Cancel,
        KeyCode::Char('u') if ctrl => {
            buf.clear();
            SecretKey::Continue
        }
        KeyCode::Backspace => {
            buf.pop();
            SecretKey::Continue
        }
        KeyCode::Char(c) if !ctrl => {
            buf.push(c);
            SecretKey::Continue
        }
        _ => SecretKey::Continue,
    }
}

/// Read a line without echoing it. Falls back to a plain read when stdin is not a
/// terminal, so piped input still works.
fn read_secret(prompt: &str) -> Option<String> {
    if !std::io::stdin().is_terminal() {
        return read_reply(prompt);
    }
    eprint!("{prompt} ");
    let _ = std::io::stderr().flush();
    if let Err(e) = enable_raw_mode() {
        warn!(error = %e, "cannot hide terminal input");
        return None;
    }

    let mut buf = String::new();
    let outcome = loop {
        match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                match apply_secret_key(&mut buf, key) {
                    SecretKey::Continue => {}
                    SecretKey::Submit => break Some(buf),
                    SecretKey::Cancel => break None,
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "failed to read terminal input");
                break None;
            }
        }
    };

    if let Err(e) = disable_raw_mode() {
        warn!(error = %e, "failed to restore terminal mode");
    }
    eprintln!();
    outcome
}

/// Reads a password from the terminal with echo off. End of input cancels.
pub struct TerminalInput;

impl InputPanel for TerminalInput {
    fn request(&self, prompt: &str) -> oneshot::Receiver<Option<String>> {
        let (tx, rx) = oneshot::channel();
        let prompt = prompt.to_string();
        std::thread::spawn(move || {
            let _ = tx.send(read_secret(&prompt));
        });
        rx
    }
}

pub struct TerminalConfirm;

/// Whether a typed answer accepts a dialog whose accept button reads `ok_label`.
pub fn is_affirmative(answer: &str, ok_label: &str) -> bool {
    let answer = answer.trim();
    ["y", "yes"].iter().any(|a| answer.eq_ignore_ascii_case(a))
        || answer.eq_ignore_ascii_case(ok_label)
}

impl ConfirmDialog for TerminalConfirm {
    fn confirm(&self, message: &str, ok_label: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let prompt = format!("{message} [{ok_label}? y/N]");
        let ok_label = ok_label.to_string();
        std::thread::spawn(move || {
            let accepted = read_reply(&prompt)
                .map(|a| is_affirmative(&a, &ok_label))
                .unwrap_or(false);
            let _ = tx.send(accepted);
        });
        rx
    }
}

/// Status line messages go to stderr.
pub struct StderrStatus;

impl StatusSink for StderrStatus {
    fn status(&self, message: &str) {
        eprintln!("{message}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    Stderr,
}

fn write_to(target: OutputTarget, text: &str) {
    let res = match target {
        OutputTarget::Stdout => {
            let mut out = std::io::stdout().lock();
            out.write_all(text.as_bytes()).and_then(|_| out.flush())
        }
        OutputTarget::Stderr => {
            let mut err = std::io::stderr().lock();
            err.write_all(text.as_bytes()).and_then(|_| err.flush())
        }
    };
    if let Err(e) = res {
        warn!(error = %e, "failed to write output");
    }
}

/// Shared region on a terminal stream; new documents as files in `output_dir`, or as
/// delimited blocks on the same stream when no directory is given.
pub struct TerminalSurface {
    target: OutputTarget,
    output_dir: Option<PathBuf>,
    documents: AtomicUsize,
}

impl TerminalSurface {
    pub fn new(target: OutputTarget, output_dir: Option<PathBuf>) -> Self {
        Self {
            target,
            output_dir,
            documents: AtomicUsize::new(0),
        }
    }

    fn document_path(&self, dir: &std::path::Path, n: usize) -> PathBuf {
        let stamp = time::OffsetDateTime::now_utc()
            .format(time::macros::format_description!(
                "[year][month][day]T[hour][minute][second]"
            ))
            .unwrap_or_else(|_| "now".into());
        dir.join(format!("pgrun-{stamp}-{n}.txt"))
    }
}

impl DisplaySurface for TerminalSurface {
    fn reset_shared(&self, encoding: &str) {
        // A terminal cannot be erased; the region simply starts where we are.
        debug!(encoding, "shared region reset");
    }

    fn append_shared(&self, text: &str) {
        write_to(self.target, text);
    }

    fn show_shared(&self) {}

    fn new_document(&self, encoding: &str) -> Box<dyn Document> {
        let n = self.documents.fetch_add(1, Ordering::Relaxed) + 1;
        match &self.output_dir {
            Some(dir) => Box::new(FileDocument {
                path: self.document_path(dir, n),
                encoding: encoding.to_string(),
                text: String::new(),
            }),
            None => Box::new(StreamDocument {
                target: self.target,
                number: n,
                text: String::new(),
            }),
        }
    }
}

struct StreamDocument {
    target: OutputTarget,
    number: usize,
    text: String,
}

impl Document for StreamDocument {
    fn append(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn focus(&mut self) {
        let block = format!("-- document {} --\n{}", self.number, self.text);
        write_to(self.target, &block);
    }
}

/// A new document saved to disk in its own encoding once it is brought into view.
pub struct FileDocument {
    path: PathBuf,
    encoding: String,
    text: String,
}

impl FileDocument {
    fn write(&self) -> anyhow::Result<()> {
        let encoding =
            Encoding::for_label(self.encoding.as_bytes()).unwrap_or(encoding_rs::UTF_8);
        let bytes = match encode_query(encoding, &self.text) {
            Ok(bytes) => bytes,
            Err(_) => {
                warn!(
                    path = %self.path.display(),
                    encoding = encoding.name(),
                    "output has characters the encoding cannot hold; writing UTF-8"
                );
                self.text.as_bytes().to_vec()
            }
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

impl Document for FileDocument {
    fn append(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn focus(&mut self) {
        match self.write() {
            Ok(()) => eprintln!("Output: {}", self.path.display()),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "failed to write output document"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affirmative_answers() {
        assert!(is_affirmative("y", "Proceed"));
        assert!(is_affirmative(" YES \n", "Proceed"));
        assert!(is_affirmative("proceed", "Proceed"));
        assert!(!is_affirmative("", "Proceed"));
        assert!(!is_affirmative("no", "Proceed"));
    }

    fn press(buf: &mut String, code: KeyCode, modifiers: KeyModifiers) -> SecretKey {
        apply_secret_key(buf, KeyEvent::new(code, modifiers))
    }

    #[test]
    fn hidden_input_editing() {
        let mut buf = String::new();
        for c in "pw1x".chars() {
            assert_eq!(
                press(&mut buf, KeyCode::Char(c), KeyModifiers::NONE),
                SecretKey::Continue
            );
        }
        press(&mut buf, KeyCode::Backspace, KeyModifiers::NONE);
        press(&mut buf, KeyCode::Char('P'), KeyModifiers::SHIFT);
        assert_eq!(buf, "pw1P");
        assert_eq!(
            press(&mut buf, KeyCode::Enter, KeyModifiers::NONE),
            SecretKey::Submit
        );

        press(&mut buf, KeyCode::Char('u'), KeyModifiers::CONTROL);
        assert!(buf.is_empty());
        assert_eq!(
            press(&mut buf, KeyCode::Char('d'), KeyModifiers::CONTROL),
            SecretKey::Cancel
        );
        assert_eq!(
            press(&mut buf, KeyCode::Char('c'), KeyModifiers::CONTROL),
            SecretKey::Cancel
        );
        assert_eq!(press(&mut buf, KeyCode::Esc, KeyModifiers::NONE), SecretKey::Cancel);
    }

    #[test]
    fn unrepresentable_document_text_falls_back_to_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let surface = TerminalSurface::new(OutputTarget::Stderr, Some(dir.path().to_path_buf()));
        let mut doc = surface.new_document("windows-1252");
        doc.append("\u{1F418}\n");
        doc.focus();

        let path = std::fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap().path();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "\u{1F418}\n");
    }

    #[test]
    fn new_documents_land_in_the_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let surface = TerminalSurface::new(OutputTarget::Stderr, Some(dir.path().join("out")));

        let mut first = surface.new_document("windows-1252");
        first.append("caf\u{e9}\n");
        first.focus();
        let mut second = surface.new_document("UTF-8");
        second.append("two\n");
        second.focus();

        let mut files: Vec<_> = std::fs::read_dir(dir.path().join("out"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort_by_key(|p| p.to_string_lossy().ends_with("-2.txt"));
        assert_eq!(files.len(), 2);
        assert_eq!(std::fs::read(&files[0]).unwrap(), b"caf\xe9\n");
        assert_eq!(std::fs::read_to_string(&files[1]).unwrap(), "two\n");
    }
}

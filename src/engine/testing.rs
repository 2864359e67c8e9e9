//! Fixtures shared by the engine tests.

use crate::lock;
use crate::surface::{ConfirmDialog, InputPanel};
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::oneshot;

const FAKE_CLIENT: &str = r#"#!/bin/sh
if [ "${PGAPPNAME:-}" = "raw" ]; then exec cat; fi
echo "arg=$1 host=${PGHOST:-} password=${PGPASSWORD:-} encoding=${PGCLIENTENCODING:-}"
cat
if [ -n "${PGCONNECT_TIMEOUT:-}" ]; then sleep "$PGCONNECT_TIMEOUT"; fi
echo "stderr-line" >&2
case "${PGOPTIONS:-}" in
  exit=*) exit "${PGOPTIONS#exit=}" ;;
esac
exit 0
"#;

/// A stand-in for psql: reports a few connection variables, echoes stdin, writes
/// to stderr, optionally sleeps (`connect_timeout`) and exits with `options=exit=N`.
/// With `application_name=raw` it only copies stdin to stdout.
#[cfg(unix)]
pub(crate) fn fake_client() -> &'static Path {
    use std::os::unix::fs::PermissionsExt;

    static CLIENT: OnceLock<(tempfile::TempDir, std::path::PathBuf)> = OnceLock::new();
    let (_, path) = CLIENT.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-psql");
        std::fs::write(&path, FAKE_CLIENT).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        // Let any fork racing with the write above reach exec before we run the script.
        std::thread::sleep(Duration::from_millis(50));
        (dir, path)
    });
    path
}

/// Input panel whose reply the test sends by hand.
#[derive(Default)]
pub(crate) struct ScriptedInput {
    pub prompts: Mutex<Vec<String>>,
    pub reply: Mutex<Option<oneshot::Sender<Option<String>>>>,
}

impl ScriptedInput {
    pub fn requested(&self) -> bool {
        !lock(&self.prompts).is_empty()
    }

    pub fn answer(&self, value: Option<&str>) {
        if let Some(tx) = lock(&self.reply).take() {
            let _ = tx.send(value.map(str::to_string));
        }
    }
}

impl InputPanel for ScriptedInput {
    fn request(&self, prompt: &str) -> oneshot::Receiver<Option<String>> {
        let (tx, rx) = oneshot::channel();
        lock(&self.prompts).push(prompt.to_string());
        *lock(&self.reply) = Some(tx);
        rx
    }
}

/// Confirmation dialog with a fixed answer.
pub(crate) struct FixedConfirm {
    pub answer: bool,
    pub asked: Mutex<Vec<(String, String)>>,
}

impl FixedConfirm {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: Mutex::new(Vec::new()),
        }
    }
}

impl ConfirmDialog for FixedConfirm {
    fn confirm(&self, message: &str, ok_label: &str) -> oneshot::Receiver<bool> {
        lock(&self.asked).push((message.to_string(), ok_label.to_string()));
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(self.answer);
        rx
    }
}

//! Foreground consumer loop.
//!
//! Background tasks never touch the display or status line themselves; they send
//! [`ForegroundEvent`]s here and this loop applies them in arrival order.

use super::output::OutputSink;
use crate::model::{elapsed_ms, ForegroundEvent, UnitReport};
use crate::surface::StatusSink;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Spawn the display-owning consumer on a blocking thread.
///
/// The loop ends when every sender is dropped and yields a report per delivered unit.
pub fn spawn_foreground(
    sink: OutputSink,
    status: Arc<dyn StatusSink>,
) -> (
    mpsc::UnboundedSender<ForegroundEvent>,
    tokio::task::JoinHandle<Vec<UnitReport>>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ForegroundEvent>();
    let handle = tokio::task::spawn_blocking(move || {
        let mut reports = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            match event {
                ForegroundEvent::Status(msg) => status.status(&msg),
                ForegroundEvent::ResetShared { encoding } => sink.reset_shared(&encoding),
                ForegroundEvent::Deliver {
                    label,
                    destination,
                    encoding,
                    result,
                } => {
                    sink.append(&result.output, destination, &encoding);
                    reports.push(UnitReport {
                        label,
                        code: result.code,
                        failed: result.failed,
                        elapsed_ms: elapsed_ms(result.elapsed),
                    });
                }
            }
        }
        reports
    });
    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock;
    use crate::model::{Destination, ProcessResult};
    use crate::orchestrator::output::tests::RecordingSurface;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingStatus(pub Mutex<Vec<String>>);

    impl StatusSink for RecordingStatus {
        fn status(&self, message: &str) {
            lock(&self.0).push(message.to_string());
        }
    }

    #[tokio::test]
    async fn applies_events_in_order_and_reports_deliveries() {
        let surface = Arc::new(RecordingSurface::default());
        let status = Arc::new(RecordingStatus::default());
        let sink = OutputSink::new(surface.clone(), Arc::new(Mutex::new(())));
        let (tx, handle) = spawn_foreground(sink, status.clone());

        tx.send(ForegroundEvent::ResetShared {
            encoding: "UTF-8".into(),
        })
        .unwrap();
        tx.send(ForegroundEvent::Status("PostgreSQL query executing...".into()))
            .unwrap();
        tx.send(ForegroundEvent::Deliver {
            label: "query".into(),
            destination: Destination::SharedRegion,
            encoding: "UTF-8".into(),
            result: ProcessResult {
                code: 0,
                output: " ?column? \n----------\n        1\n".into(),
                elapsed: Duration::from_millis(12),
                failed: false,
            },
        })
        .unwrap();
        drop(tx);

        let reports = handle.await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].label, "query");
        assert_eq!(reports[0].code, 0);
        assert!(!reports[0].failed);
        assert!((reports[0].elapsed_ms - 12.0).abs() < 1e-6);
        assert!(lock(&surface.shared).contains("        1"));
        assert_eq!(
            *lock(&status.0),
            vec!["PostgreSQL query executing...".to_string()]
        );
    }
}

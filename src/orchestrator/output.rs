//! Serialized writes to the display surface.

use crate::lock;
use crate::model::Destination;
use crate::surface::DisplaySurface;
use std::sync::{Arc, Mutex};

/// Routes finished output to the shared region or to a fresh document.
///
/// Shared-region writes hold the session's output lock for the whole append+show so
/// concurrent deliveries never interleave. New documents belong to one delivery and
/// are written without locking.
pub struct OutputSink {
    surface: Arc<dyn DisplaySurface>,
    shared_lock: Arc<Mutex<()>>,
}

impl OutputSink {
    pub fn new(surface: Arc<dyn DisplaySurface>, shared_lock: Arc<Mutex<()>>) -> Self {
        Self {
            surface,
            shared_lock,
        }
    }

    pub fn reset_shared(&self, encoding: &str) {
        let _guard = lock(&self.shared_lock);
        self.surface.reset_shared(encoding);
    }

    pub fn append(&self, text: &str, destination: Destination, encoding: &str) {
        match destination {
            Destination::SharedRegion => {
                let _guard = lock(&self.shared_lock);
                self.surface.append_shared(text);
                self.surface.show_shared();
            }
            Destination::NewDocument => {
                let mut doc = self.surface.new_document(encoding);
                doc.append(text);
                doc.focus();
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::surface::Document;

    /// Records surface calls. Shared appends go in one character at a time so any
    /// missing serialization shows up as interleaving.
    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub shared: Mutex<String>,
        pub shows: Mutex<usize>,
        pub resets: Mutex<Vec<String>>,
        pub documents: Arc<Mutex<Vec<(String, String, bool)>>>,
    }

    struct RecordingDocument {
        encoding: String,
        text: String,
        sink: Arc<Mutex<Vec<(String, String, bool)>>>,
    }

    impl Document for RecordingDocument {
        fn append(&mut self, text: &str) {
            self.text.push_str(text);
        }

        fn focus(&mut self) {
            lock(&self.sink).push((self.encoding.clone(), self.text.clone(), true));
        }
    }

    impl DisplaySurface for RecordingSurface {
        fn reset_shared(&self, encoding: &str) {
            lock(&self.shared).clear();
            lock(&self.resets).push(encoding.to_string());
        }

        fn append_shared(&self, text: &str) {
            for ch in text.chars() {
                lock(&self.shared).push(ch);
                std::thread::yield_now();
            }
        }

        fn show_shared(&self) {
            *lock(&self.shows) += 1;
        }

        fn new_document(&self, encoding: &str) -> Box<dyn Document> {
            Box::new(RecordingDocument {
                encoding: encoding.to_string(),
                text: String::new(),
                sink: self.documents.clone(),
            })
        }
    }

    #[test]
    fn concurrent_shared_appends_never_interleave() {
        let surface = Arc::new(RecordingSurface::default());
        let sink = Arc::new(OutputSink::new(surface.clone(), Arc::new(Mutex::new(()))));

        let messages: Vec<String> = (0..8)
            .map(|i| format!("<{i}:{}>", char::from(b'a' + i as u8).to_string().repeat(64)))
            .collect();
        let handles: Vec<_> = messages
            .iter()
            .cloned()
            .map(|msg| {
                let sink = sink.clone();
                std::thread::spawn(move || sink.append(&msg, Destination::SharedRegion, "UTF-8"))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let shared = lock(&surface.shared).clone();
        assert_eq!(shared.len(), messages.iter().map(String::len).sum::<usize>());
        for msg in &messages {
            assert!(shared.contains(msg.as_str()), "{msg} was split");
        }
        assert_eq!(*lock(&surface.shows), 8);
    }

    #[test]
    fn new_documents_are_separate_and_focused() {
        let surface = Arc::new(RecordingSurface::default());
        let sink = OutputSink::new(surface.clone(), Arc::new(Mutex::new(())));

        sink.append("one", Destination::NewDocument, "UTF-8");
        sink.append("two", Destination::NewDocument, "windows-1252");

        let docs = lock(&surface.documents).clone();
        assert_eq!(
            docs,
            vec![
                ("UTF-8".to_string(), "one".to_string(), true),
                ("windows-1252".to_string(), "two".to_string(), true),
            ]
        );
        assert!(lock(&surface.shared).is_empty());
        assert_eq!(*lock(&surface.shows), 0);
    }

    #[test]
    fn reset_clears_shared_region() {
        let surface = Arc::new(RecordingSurface::default());
        let sink = OutputSink::new(surface.clone(), Arc::new(Mutex::new(())));
        sink.append("stale", Destination::SharedRegion, "UTF-8");
        sink.reset_shared("UTF-8");
        assert!(lock(&surface.shared).is_empty());
        assert_eq!(*lock(&surface.resets), vec!["UTF-8".to_string()]);
    }
}

//! Host collaborators: input panel, confirmation dialog, status line and display surface.
//!
//! Interactive collaborators answer through a oneshot channel so the dispatcher can
//! suspend without blocking whoever triggered it. A dropped sender counts as a cancel.

use tokio::sync::oneshot;

/// Modal single-line text input. Replies `None` when the user cancels.
pub trait InputPanel: Send + Sync {
    fn request(&self, prompt: &str) -> oneshot::Receiver<Option<String>>;
}

/// Yes/no dialog. Replies `true` when the user accepts.
pub trait ConfirmDialog: Send + Sync {
    fn confirm(&self, message: &str, ok_label: &str) -> oneshot::Receiver<bool>;
}

pub trait StatusSink: Send + Sync {
    fn status(&self, message: &str);
}

/// A fresh output document owned by a single delivery.
pub trait Document: Send {
    fn append(&mut self, text: &str);
    /// Bring the document into view.
    fn focus(&mut self);
}

/// Where query output ends up.
pub trait DisplaySurface: Send + Sync {
    /// Erase the shared region and prepare it for output in `encoding`.
    fn reset_shared(&self, encoding: &str);
    fn append_shared(&self, text: &str);
    /// Bring the shared region into view.
    fn show_shared(&self);
    fn new_document(&self, encoding: &str) -> Box<dyn Document>;
}

//! Lifecycle hooks around filesystem mutations.
//!
//! Each mutating operation fires a before-hook and an after-hook. Before-hooks
//! are vetoable: a listener may stop the event and optionally supply the value
//! the operation returns instead of doing its work. After-hooks only observe.
//!
//! Listeners run synchronously on the caller's thread, in registration order.
//! Dispatch stops at the first listener that stops the event.

use std::fmt;

use serde::Serialize;

use crate::entity::FileEntity;
use crate::hash::ContentHash;

/// One dispatch of a before-hook.
#[derive(Debug)]
pub struct Event<P, R> {
    name: &'static str,
    payload: P,
    stopped: bool,
    result: Option<R>,
}

impl<P, R> Event<P, R> {
    pub fn new(name: &'static str, payload: P) -> Self {
        Self {
            name,
            payload,
            stopped: false,
            result: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Stop the operation without a replacement value.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Stop the operation and return `result` from it instead.
    pub fn stop_with(&mut self, result: R) {
        self.stopped = true;
        self.result = Some(result);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn result(&self) -> Option<&R> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<R> {
        self.result
    }
}

/// Listener for a vetoable hook.
pub type Listener<P, R> = Box<dyn FnMut(&mut Event<P, R>) + Send + 'static>;

/// Listener for an after-hook.
pub type Observer<P> = Box<dyn FnMut(&P) + Send + 'static>;

/// A vetoable hook point.
pub struct Hook<P, R> {
    name: &'static str,
    listeners: Vec<Listener<P, R>>,
}

impl<P, R> Hook<P, R> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a listener; it runs after every listener registered before it.
    pub fn listen(&mut self, listener: impl FnMut(&mut Event<P, R>) + Send + 'static) -> &mut Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn dispatch(&mut self, payload: P) -> Event<P, R> {
        let mut event = Event::new(self.name, payload);
        for listener in &mut self.listeners {
            listener(&mut event);
            if event.is_stopped() {
                tracing::debug!(hook = self.name, "event stopped by listener");
                break;
            }
        }
        event
    }
}

impl<P, R> fmt::Debug for Hook<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// A notification-only hook point.
pub struct Observers<P> {
    name: &'static str,
    observers: Vec<Observer<P>>,
}

impl<P> Observers<P> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            observers: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn listen(&mut self, observer: impl FnMut(&P) + Send + 'static) -> &mut Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }

    pub fn notify(&mut self, payload: &P) {
        for observer in &mut self.observers {
            observer(payload);
        }
    }
}

impl<P> fmt::Debug for Observers<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("name", &self.name)
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// What an upload is about to write, handed to `before_upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingUpload {
    /// Name reported by the upload source.
    pub filename: String,
    pub size: u64,
    pub mime: String,
    pub hash: ContentHash,
    /// Destination computed by the formatter.
    pub path: String,
    /// Sanitized basename from the formatter; becomes the entity's filename.
    pub base_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRename {
    pub entity: FileEntity,
    pub new_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCopy {
    pub entity: FileEntity,
    pub destination: String,
}

/// Payload of `after_copy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedFile {
    pub copy: FileEntity,
    pub original: FileEntity,
}

/// Every hook point of a `Filesystem`.
#[derive(Debug)]
pub struct Hooks {
    pub before_upload: Hook<PendingUpload, FileEntity>,
    pub after_upload: Observers<FileEntity>,
    pub before_delete: Hook<FileEntity, bool>,
    pub after_delete: Observers<FileEntity>,
    pub before_rename: Hook<PendingRename, FileEntity>,
    pub after_rename: Observers<FileEntity>,
    pub before_copy: Hook<PendingCopy, FileEntity>,
    pub after_copy: Observers<CopiedFile>,
}

impl Hooks {
    pub fn new() -> Self {
        Self {
            before_upload: Hook::new("before_upload"),
            after_upload: Observers::new("after_upload"),
            before_delete: Hook::new("before_delete"),
            after_delete: Observers::new("after_delete"),
            before_rename: Hook::new("before_rename"),
            after_rename: Observers::new("after_rename"),
            before_copy: Hook::new("before_copy"),
            after_copy: Observers::new("after_copy"),
        }
    }

    /// Drop every registered listener.
    pub fn clear(&mut self) {
        self.before_upload.clear();
        self.after_upload.clear();
        self.before_delete.clear();
        self.after_delete.clear();
        self.before_rename.clear();
        self.after_rename.clear();
        self.before_copy.clear();
        self.after_copy.clear();
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self::new()
    }
}

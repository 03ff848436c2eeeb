use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use tagwire_frame::{FrameError, MessageType, CHECK, ERROR};
use tracing::{debug, warn};

use crate::handler::{ErrorHook, Handler, HandlerResult};

/// What runs for one registered tag.
#[derive(Clone)]
pub enum HandlerEntry {
    /// Built-in `CHECK`: acknowledges with an empty payload.
    Check,
    /// Built-in `ERROR`: forwards the payload to the connection's [`ErrorHook`].
    Error,
    /// Application handler.
    Custom(Arc<dyn Handler>),
}

impl HandlerEntry {
    /// Run this entry for one payload.
    pub fn invoke(&self, payload: &[u8], peer: &str, hook: &dyn ErrorHook) -> HandlerResult {
        match self {
            HandlerEntry::Check => Ok(Some(Bytes::new())),
            HandlerEntry::Error => {
                hook.handle_error(peer, payload);
                Ok(None)
            }
            HandlerEntry::Custom(handler) => handler.handle(payload),
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, HandlerEntry::Custom(_))
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerEntry::Check => f.write_str("HandlerEntry::Check"),
            HandlerEntry::Error => f.write_str("HandlerEntry::Error"),
            HandlerEntry::Custom(_) => f.write_str("HandlerEntry::Custom(..)"),
        }
    }
}

/// Tag-keyed registry of message handlers.
///
/// Built once at startup, shared as `Arc<TypeRegistry>` by every connection,
/// and safe to extend while connections are dispatching. Registering a tag
/// that already has a handler replaces it (last writer wins); this includes
/// the built-in `CHECK` and `ERROR` entries.
pub struct TypeRegistry {
    handlers: RwLock<HashMap<MessageType, HandlerEntry>>,
}

impl TypeRegistry {
    /// Create a registry holding only the built-in `CHECK` and `ERROR` entries.
    pub fn new() -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(MessageType::check(), HandlerEntry::Check);
        handlers.insert(MessageType::error(), HandlerEntry::Error);
        Self {
            handlers: RwLock::new(handlers),
        }
    }

    /// Register a handler for `tag`.
    ///
    /// Returns `true` when an earlier handler for the same tag was replaced.
    pub fn register(&self, tag: impl AsRef<str>, handler: impl Handler) -> Result<bool, FrameError> {
        self.register_entry(tag, HandlerEntry::Custom(Arc::new(handler)))
    }

    /// Register a closure. Spelling out the `Fn` bound lets the closure's
    /// argument type be inferred at the call site.
    pub fn register_fn<F>(&self, tag: impl AsRef<str>, handler: F) -> Result<bool, FrameError>
    where
        F: Fn(&[u8]) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(tag, handler)
    }

    /// Register a shared handler, e.g. one instance serving several tags.
    pub fn register_shared(
        &self,
        tag: impl AsRef<str>,
        handler: Arc<dyn Handler>,
    ) -> Result<bool, FrameError> {
        self.register_entry(tag, HandlerEntry::Custom(handler))
    }

    /// Register any entry, including putting a built-in back.
    pub fn register_entry(
        &self,
        tag: impl AsRef<str>,
        entry: HandlerEntry,
    ) -> Result<bool, FrameError> {
        let tag = MessageType::new(tag)?;
        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.clone(), entry)
            .is_some();

        if replaced {
            warn!(%tag, "replaced existing handler");
        } else {
            debug!(%tag, "registered handler");
        }
        Ok(replaced)
    }

    /// Look up the entry for `tag`. `None` means no handler is registered.
    ///
    /// The returned entry is a cheap clone, so the registry lock is released
    /// before the handler runs.
    pub fn lookup(&self, tag: &str) -> Option<HandlerEntry> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .cloned()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<MessageType> {
        let mut tags: Vec<MessageType> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        tags.sort_unstable();
        tags
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `tag` is still served by its built-in entry.
    pub fn is_default(&self, tag: &str) -> bool {
        match tag {
            CHECK | ERROR => self.lookup(tag).is_some_and(|entry| entry.is_builtin()),
            _ => false,
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

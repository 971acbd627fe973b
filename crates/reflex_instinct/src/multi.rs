//! Several named routines behind one Instinct engine.
//!
//! The worker owns the routines; a shared [`ModeSelector`] holds the active
//! mode so operators can change it while the worker runs. The selection is
//! persisted through a [`ModeStore`] and restored at build time.

use crate::context::InstinctContext;
use crate::engine::InstinctModule;
use crate::error::InstinctResult;
use crate::store::ModeStore;
use parking_lot::Mutex;
use reflex_core::{event_fn, DiscreteCell, DiscreteInput, ReflexError, SharedEventSink, Sink};
use std::collections::HashSet;
use std::sync::Arc;

/// A remote request handler: request bytes in, reply bytes out.
pub type Invokable = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

// ============================================================================
// Selector
// ============================================================================

/// The active-mode register shared between the worker and operators.
pub struct ModeSelector {
    names: Vec<String>,
    active: Mutex<Option<usize>>,
    active_index: Arc<DiscreteCell>,
    store: Arc<dyn ModeStore>,
    store_key: String,
}

impl ModeSelector {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn active(&self) -> Option<usize> {
        *self.active.lock()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active().map(|i| self.names[i].as_str())
    }

    /// Index of the active mode, or -1 when none is selected.
    pub fn active_input(&self) -> DiscreteInput {
        self.active_index.clone()
    }

    pub fn set_active(&self, name: &str) -> Result<(), ReflexError> {
        let index = self
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| ReflexError::invalid(format!("unknown mode: {:?}", name)))?;
        self.select(index);
        Ok(())
    }

    pub fn set_active_index(&self, index: usize) -> Result<(), ReflexError> {
        if index >= self.names.len() {
            return Err(ReflexError::invalid(format!(
                "mode index {} out of range 0..{}",
                index,
                self.names.len()
            )));
        }
        self.select(index);
        Ok(())
    }

    /// Select the mode after the active one, wrapping around. Selects the
    /// first mode when none is active.
    pub fn select_next(&self) -> &str {
        let next = match self.active() {
            Some(i) => (i + 1) % self.names.len(),
            None => 0,
        };
        self.select(next);
        &self.names[next]
    }

    /// Select the mode before the active one, wrapping around. Selects the
    /// last mode when none is active.
    pub fn select_previous(&self) -> &str {
        let len = self.names.len();
        let previous = match self.active() {
            Some(i) => (i + len - 1) % len,
            None => len - 1,
        };
        self.select(previous);
        &self.names[previous]
    }

    fn select(&self, index: usize) {
        *self.active.lock() = Some(index);
        let name = &self.names[index];
        tracing::info!("Active mode set to '{}'", name);
        if let Err(e) = self.active_index.set(index as i64) {
            tracing::error!("Active-mode subscriber failed: {:#}", e);
        }
        if let Err(e) = self.store.set_string(&self.store_key, name) {
            tracing::warn!("Failed to persist active mode '{}': {:#}", name, e);
        }
    }

    pub fn next_event(self: &Arc<Self>) -> SharedEventSink {
        let selector = Arc::downgrade(self);
        event_fn(move || {
            if let Some(selector) = selector.upgrade() {
                selector.select_next();
            }
            Ok(())
        })
    }

    pub fn previous_event(self: &Arc<Self>) -> SharedEventSink {
        let selector = Arc::downgrade(self);
        event_fn(move || {
            if let Some(selector) = selector.upgrade() {
                selector.select_previous();
            }
            Ok(())
        })
    }

    /// Handle an operator request.
    ///
    /// An empty request lists the modes, one per line, with the active one
    /// prefixed by `* ` and the others by two spaces. Any other request is a
    /// mode name to select; the reply is `OK <name>` or `ERR <reason>`.
    pub fn handle_request(&self, request: &[u8]) -> Vec<u8> {
        let Ok(text) = std::str::from_utf8(request) else {
            return b"ERR request is not UTF-8".to_vec();
        };
        let name = text.trim();
        if name.is_empty() {
            return self.listing().into_bytes();
        }
        match self.set_active(name) {
            Ok(()) => format!("OK {}", name).into_bytes(),
            Err(e) => format!("ERR {}", e).into_bytes(),
        }
    }

    fn listing(&self) -> String {
        let active = self.active();
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let marker = if Some(i) == active { "* " } else { "  " };
                format!("{}{}\n", marker, name)
            })
            .collect()
    }

    /// [`Self::handle_request`] packaged for a remote dialog collaborator.
    pub fn remote(self: &Arc<Self>) -> Invokable {
        let selector = Arc::downgrade(self);
        Arc::new(move |request: &[u8]| match selector.upgrade() {
            Some(selector) => selector.handle_request(request),
            None => b"ERR selector is gone".to_vec(),
        })
    }
}

impl std::fmt::Debug for ModeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeSelector")
            .field("names", &self.names)
            .field("active", &self.active_name())
            .finish()
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Dispatches each run to the active mode's routine.
pub struct InstinctMulti {
    label: String,
    modes: Vec<Box<dyn InstinctModule>>,
    selector: Arc<ModeSelector>,
}

impl InstinctMulti {
    pub fn builder(label: impl Into<String>) -> InstinctMultiBuilder {
        InstinctMultiBuilder {
            label: label.into(),
            modes: Vec::new(),
        }
    }

    pub fn selector(&self) -> Arc<ModeSelector> {
        Arc::clone(&self.selector)
    }
}

impl InstinctModule for InstinctMulti {
    /// Run the active mode. With no mode selected this logs and returns.
    fn autonomous_main(&mut self, ctx: &InstinctContext) -> InstinctResult {
        let Some(index) = self.selector.active() else {
            tracing::warn!("Instinct '{}' has no active mode; nothing to run", self.label);
            return Ok(());
        };
        tracing::info!("Instinct '{}' running mode '{}'", self.label, self.selector.names[index]);
        self.modes[index].autonomous_main(ctx)
    }
}

impl std::fmt::Debug for InstinctMulti {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstinctMulti")
            .field("label", &self.label)
            .field("selector", &self.selector)
            .finish()
    }
}

pub struct InstinctMultiBuilder {
    label: String,
    modes: Vec<(String, Box<dyn InstinctModule>)>,
}

impl InstinctMultiBuilder {
    pub fn mode(mut self, name: impl Into<String>, module: impl InstinctModule) -> Self {
        self.modes.push((name.into(), Box::new(module)));
        self
    }

    /// Validate the mode list and restore the persisted selection.
    ///
    /// Fails on an empty list, an empty or multi-line name, or a duplicate.
    /// A persisted name that no longer exists is logged and ignored.
    pub fn build(self, store: Arc<dyn ModeStore>) -> Result<InstinctMulti, ReflexError> {
        if self.modes.is_empty() {
            return Err(ReflexError::invalid(format!("'{}' needs at least one mode", self.label)));
        }
        let mut seen = HashSet::new();
        for (name, _) in &self.modes {
            if name.trim().is_empty() || name.trim() != name || name.contains('\n') {
                return Err(ReflexError::invalid(format!("bad mode name: {:?}", name)));
            }
            if !seen.insert(name.as_str()) {
                return Err(ReflexError::invalid(format!("duplicate mode name: {:?}", name)));
            }
        }

        let (names, modes): (Vec<String>, Vec<Box<dyn InstinctModule>>) = self.modes.into_iter().unzip();
        let store_key = format!("{}.active_mode", self.label);
        let restored = store
            .get_string(&store_key)
            .and_then(|saved| match names.iter().position(|n| *n == saved) {
                Some(index) => Some(index),
                None => {
                    tracing::warn!("Persisted mode '{}' for '{}' no longer exists", saved, self.label);
                    None
                }
            });

        let selector = Arc::new(ModeSelector {
            active: Mutex::new(restored),
            active_index: DiscreteCell::shared(restored.map_or(-1, |i| i as i64)),
            names,
            store,
            store_key,
        });
        if let Some(name) = selector.active_name() {
            tracing::info!("Restored active mode '{}' for '{}'", name, self.label);
        }
        Ok(InstinctMulti {
            label: self.label,
            modes,
            selector,
        })
    }
}

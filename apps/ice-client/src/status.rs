//! Status board for the current transport states

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

pub const ICE_STATE: &str = "ice-state";
pub const QUIC_STATE: &str = "quic-state";

/// Named text slots, updated from state observers on any task
#[derive(Clone, Default)]
pub struct StatusBoard {
    entries: Arc<RwLock<BTreeMap<&'static str, String>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: &'static str, text: impl Into<String>) {
        self.entries.write().insert(id, text.into());
    }

    pub fn get(&self, id: &str) -> Option<String> {
        self.entries.read().get(id).cloned()
    }
}

impl fmt::Display for StatusBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, text) in self.entries.read().iter() {
            writeln!(f, "{:<12}{}", id, text)?;
        }
        Ok(())
    }
}

//! DBC-backed message codec table.
//!
//! The DBC grammar itself is delegated to the `can-dbc` parser; this module
//! consumes the parsed network and keeps, per message, a [`MessageCodec`]
//! holding the wire identifier, byte length, comment and the signal
//! pack/unpack table.
//!
//! Documents are registered under a namespace so several DBC files can
//! coexist (for example one per ECU vendor). [`DbcLibrary::find`] searches
//! namespaces in registration order, matching the lookup behavior hosts
//! expect when only a message name is known.
//!
//! Loading is all-or-nothing: a document that fails to read or parse leaves
//! the library exactly as it was.

mod codec;
mod layout;

pub use codec::{DEFAULT_INTERVAL, MessageCodec, SignalSpec, SignalValues};
pub use layout::SignalLayout;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{HarnessError, Result};

/// Namespaced table of message codecs parsed from DBC documents.
#[derive(Debug, Default)]
pub struct DbcLibrary {
    /// Namespaces in registration order; lookup by bare name walks them
    /// front to back.
    pools: Vec<(String, HashMap<String, Arc<MessageCodec>>)>,
}

impl DbcLibrary {
    /// Create an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience: a library with one document in the default namespace.
    pub fn from_str(text: &str) -> Result<Self> {
        let mut library = Self::new();
        library.register_str("", text)?;
        Ok(library)
    }

    /// Parse a DBC document and merge its messages into `namespace`.
    ///
    /// Returns the number of messages added. On parse failure the library
    /// is left untouched.
    pub fn register_str(&mut self, namespace: &str, text: &str) -> Result<usize> {
        let dbc = can_dbc::DBC::from_slice(text.as_bytes())
            .map_err(|e| HarnessError::parse("DBC parse", format!("{e:?}")))?;

        let mut codecs = HashMap::with_capacity(dbc.messages().len());
        for message in dbc.messages() {
            let codec = MessageCodec::from_dbc(message, &dbc);
            debug!(
                "registered DBC message {} ({:#X}, {} bytes)",
                codec.name(),
                codec.wire_id(),
                codec.byte_len()
            );
            if let Some(previous) = codecs.insert(codec.name().to_string(), Arc::new(codec)) {
                warn!("duplicate message name '{}' in DBC document", previous.name());
            }
        }

        let added = codecs.len();
        let pool = self.pool_mut(namespace);
        pool.extend(codecs);
        Ok(added)
    }

    /// Read and parse a DBC file into `namespace`.
    ///
    /// Unreadable or malformed files are a hard failure with no partial
    /// table retained.
    pub fn register_file(&mut self, namespace: &str, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| HarnessError::file(path, e))?;
        self.register_str(namespace, &text)
    }

    /// Find a message codec by name, searching namespaces in registration
    /// order.
    pub fn find(&self, name: &str) -> Option<Arc<MessageCodec>> {
        self.pools.iter().find_map(|(_, pool)| pool.get(name).cloned())
    }

    /// Find a message codec in a specific namespace.
    pub fn find_in(&self, namespace: &str, name: &str) -> Option<Arc<MessageCodec>> {
        self.pools
            .iter()
            .find(|(ns, _)| ns == namespace)
            .and_then(|(_, pool)| pool.get(name).cloned())
    }

    /// Total number of registered messages across all namespaces.
    pub fn len(&self) -> usize {
        self.pools.iter().map(|(_, pool)| pool.len()).sum()
    }

    /// Whether the library holds no messages.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pool_mut(&mut self, namespace: &str) -> &mut HashMap<String, Arc<MessageCodec>> {
        if let Some(index) = self.pools.iter().position(|(ns, _)| ns == namespace) {
            &mut self.pools[index].1
        } else {
            self.pools.push((namespace.to_string(), HashMap::new()));
            &mut self.pools.last_mut().expect("pool just pushed").1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils::DBC_FIXTURE as FIXTURE;

    #[test]
    fn library_loads_messages_with_metadata() {
        let library = DbcLibrary::from_str(FIXTURE).unwrap();
        assert_eq!(library.len(), 2);

        let engine = library.find("EngineData").unwrap();
        assert_eq!(engine.wire_id(), 496);
        assert_eq!(engine.byte_len(), 8);
        assert_eq!(engine.comment(), "Engine state broadcast");
        assert_eq!(engine.interval_hint(), std::time::Duration::from_millis(100));
        assert_eq!(engine.signal_names().count(), 2);
    }

    #[test]
    fn cycle_time_defaults_when_attribute_missing() {
        let library = DbcLibrary::from_str(FIXTURE).unwrap();
        let speed = library.find("VehicleSpeed").unwrap();
        assert_eq!(speed.interval_hint(), DEFAULT_INTERVAL);
    }

    #[test]
    fn malformed_document_leaves_library_untouched() {
        let mut library = DbcLibrary::from_str(FIXTURE).unwrap();
        let before = library.len();

        let err = library.register_str("extra", "BO_ not a dbc document").unwrap_err();
        assert!(matches!(err, HarnessError::Parse { .. }));
        assert_eq!(library.len(), before);
        assert!(library.find_in("extra", "EngineData").is_none());
    }

    #[test]
    fn missing_file_is_a_hard_failure() {
        let mut library = DbcLibrary::new();
        let err = library.register_file("", "/nonexistent/network.dbc").unwrap_err();
        assert!(matches!(err, HarnessError::File { .. }));
        assert!(library.is_empty());
    }

    #[test]
    fn find_searches_namespaces_in_registration_order() {
        let mut library = DbcLibrary::new();
        library.register_str("first", FIXTURE).unwrap();

        // Same message name in a later namespace; the earlier one wins for
        // bare-name lookup, exact lookup still reaches both.
        library.register_str("second", FIXTURE).unwrap();

        let bare = library.find("EngineData").unwrap();
        let first = library.find_in("first", "EngineData").unwrap();
        let second = library.find_in("second", "EngineData").unwrap();
        assert!(Arc::ptr_eq(&bare, &first));
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn signal_decode_from_fixture_layout() {
        let library = DbcLibrary::from_str(FIXTURE).unwrap();
        let engine = library.find("EngineData").unwrap();

        // Golden frame: Temperature raw 0xDB6 (-586 -> 244.14 degK).
        let payload = [0xA5, 0xB6, 0xD9, 0x00, 0x00, 0x00, 0x00, 0x00];
        let values = engine.decode(&payload).unwrap();
        assert!((values["Temperature"] - 244.14).abs() < 1e-9);
    }
}

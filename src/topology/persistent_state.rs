//! State persisted per cache across restarts.

use crc::{Crc, CRC_32_ISCSI};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// CRC-32 calculator (iSCSI polynomial)
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Properties a node persisted for one cache scope.
///
/// The checksum lets the topology coordinator tell whether restarting nodes
/// come back with the same persisted layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedPersistentState {
    scope: String,
    properties: BTreeMap<String, String>,
}

impl ScopedPersistentState {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Checksum over the properties in key order.
    ///
    /// Properties whose key starts with `@` are local bookkeeping and excluded.
    pub fn checksum(&self) -> u32 {
        let mut digest = CRC32.digest();
        for (key, value) in self.properties.iter().filter(|(k, _)| !k.starts_with('@')) {
            digest.update(key.as_bytes());
            digest.update(b"=");
            digest.update(value.as_bytes());
            digest.update(b"\n");
        }
        digest.finalize()
    }
}

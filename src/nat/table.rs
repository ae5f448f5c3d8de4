//! In-memory conntrack table.

use super::{Conntracker, FiveTuple, IPTranslation, NatError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// One row of a JSON conntrack table file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEntry {
    pub tuple: FiveTuple,
    pub translation: IPTranslation,
}

/// Conntrack lookups served from a mapping held in memory.
///
/// Used by the replay agent and in tests in place of the netlink-backed tracker.
#[derive(Debug, Default)]
pub struct StaticConntrack {
    entries: RwLock<HashMap<FiveTuple, IPTranslation>>,
}

impl StaticConntrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON array of [`TableEntry`] rows.
    pub fn load(path: &Path) -> Result<Self, NatError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            NatError::Unavailable(format!("failed to read {}: {}", path.display(), e))
        })?;
        let rows: Vec<TableEntry> = serde_json::from_str(&raw).map_err(|e| {
            NatError::Unavailable(format!("failed to parse {}: {}", path.display(), e))
        })?;

        let table = Self::new();
        for row in rows {
            table.insert(row.tuple, row.translation);
        }
        Ok(table)
    }

    pub fn insert(&self, tuple: FiveTuple, translation: IPTranslation) {
        self.entries.write().insert(tuple, translation);
    }

    pub fn remove(&self, tuple: &FiveTuple) -> bool {
        self.entries.write().remove(tuple).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Conntracker for StaticConntrack {
    fn lookup(&self, tuple: &FiveTuple) -> Result<Option<IPTranslation>, NatError> {
        Ok(self.entries.read().get(tuple).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::types::ConnectionType;
    use std::io::Write;

    fn tuple() -> FiveTuple {
        FiveTuple {
            conn_type: ConnectionType::Tcp,
            source: Address::v4(172, 17, 0, 2),
            sport: 40000,
            dest: Address::v4(1, 1, 1, 1),
            dport: 53,
        }
    }

    fn translation() -> IPTranslation {
        IPTranslation {
            repl_src_ip: Address::v4(1, 1, 1, 1),
            repl_dst_ip: Address::v4(192, 168, 1, 10),
            repl_src_port: 53,
            repl_dst_port: 61000,
        }
    }

    #[test]
    fn test_lookup_hit_and_miss() {
        let table = StaticConntrack::new();
        assert!(table.lookup(&tuple()).unwrap().is_none());

        table.insert(tuple(), translation());
        assert_eq!(table.lookup(&tuple()).unwrap(), Some(translation()));
        assert_eq!(table.len(), 1);

        assert!(table.remove(&tuple()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_load_from_json_file() {
        let rows = vec![TableEntry {
            tuple: tuple(),
            translation: translation(),
        }];
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&rows).unwrap().as_bytes())
            .unwrap();

        let table = StaticConntrack::load(file.path()).unwrap();
        assert_eq!(table.lookup(&tuple()).unwrap(), Some(translation()));
    }

    #[test]
    fn test_load_missing_file_is_unavailable() {
        let err = StaticConntrack::load(Path::new("/nonexistent/conntrack.json")).unwrap_err();
        assert!(matches!(err, NatError::Unavailable(_)));
    }
}

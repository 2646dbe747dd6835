//! Immutable, ordered set of schema migrations.

use std::collections::HashSet;

use crate::error::{WorldError, WorldResult};

use super::builtin::BUILTIN_MIGRATIONS;

/// A reversible schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Monotonic version, also the ledger primary key.
    pub version: i64,
    pub name: &'static str,
    /// Script applied by `MigrationRunner::run`.
    pub up: &'static str,
    /// Script applied by `MigrationRunner::rollback`.
    pub down: &'static str,
}

impl Migration {
    pub const fn new(version: i64, name: &'static str, up: &'static str, down: &'static str) -> Self {
        Self {
            version,
            name,
            up,
            down,
        }
    }
}

/// Migrations sorted by ascending version.
///
/// Built once and handed to a runner; nothing can be added after
/// construction.
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    /// Validate and sort a set of migrations.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMigration` if a version is not positive or appears
    /// twice.
    pub fn new(mut migrations: Vec<Migration>) -> WorldResult<Self> {
        let mut seen = HashSet::new();
        for migration in &migrations {
            if migration.version <= 0 {
                return Err(WorldError::InvalidMigration(format!(
                    "version {} of '{}' must be positive",
                    migration.version, migration.name
                )));
            }
            if !seen.insert(migration.version) {
                return Err(WorldError::InvalidMigration(format!(
                    "duplicate version {}",
                    migration.version
                )));
            }
        }
        migrations.sort_by_key(|m| m.version);
        Ok(Self { migrations })
    }

    /// Registry holding the engine's own schema.
    pub fn builtin() -> Self {
        // BUILTIN_MIGRATIONS is declared in ascending, contiguous order.
        Self {
            migrations: BUILTIN_MIGRATIONS.to_vec(),
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn get(&self, version: i64) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version)
            .ok()
            .map(|idx| &self.migrations[idx])
    }

    /// Highest version known to the registry, or 0 when empty.
    pub fn latest_version(&self) -> i64 {
        self.migrations.last().map(|m| m.version).unwrap_or(0)
    }

    /// Migrations whose version is not in `applied`, ascending.
    pub fn pending(&self, applied: &[i64]) -> Vec<&Migration> {
        let applied: HashSet<i64> = applied.iter().copied().collect();
        self.migrations
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(version: i64, name: &'static str) -> Migration {
        Migration::new(version, name, "SELECT 1", "SELECT 1")
    }

    #[test]
    fn test_registry_sorts_by_version() {
        let registry = MigrationRegistry::new(vec![m(3, "c"), m(1, "a"), m(2, "b")]).unwrap();
        let versions: Vec<i64> = registry.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(registry.latest_version(), 3);
        assert_eq!(registry.get(2).map(|m| m.name), Some("b"));
        assert!(registry.get(4).is_none());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let err = MigrationRegistry::new(vec![m(1, "a"), m(1, "again")]).unwrap_err();
        assert!(matches!(err, WorldError::InvalidMigration(_)));
    }

    #[test]
    fn test_registry_rejects_non_positive() {
        assert!(MigrationRegistry::new(vec![m(0, "zero")]).is_err());
        assert!(MigrationRegistry::new(vec![m(-2, "negative")]).is_err());
    }

    #[test]
    fn test_pending_skips_applied_and_keeps_order() {
        let registry = MigrationRegistry::new(vec![m(4, "d"), m(1, "a"), m(3, "c"), m(2, "b")]).unwrap();
        let pending: Vec<i64> = registry.pending(&[1, 3]).iter().map(|m| m.version).collect();
        assert_eq!(pending, vec![2, 4]);
        assert!(registry.pending(&[1, 2, 3, 4]).is_empty());
    }

    #[test]
    fn test_empty_registry() {
        let registry = MigrationRegistry::new(Vec::new()).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.latest_version(), 0);
    }
}

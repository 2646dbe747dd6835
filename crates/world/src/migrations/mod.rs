//! Versioned schema migrations.
//!
//! - [`MigrationRegistry`]: the ordered, immutable list of migrations
//! - [`MigrationRunner`]: applies, reverts and reports them through the
//!   `schema_migrations` ledger
//! - [`BUILTIN_MIGRATIONS`]: the schema the store depends on

mod builtin;
mod registry;
mod runner;

pub use builtin::BUILTIN_MIGRATIONS;
pub use registry::{Migration, MigrationRegistry};
pub use runner::MigrationRunner;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = MigrationRegistry::builtin();
        assert_eq!(registry.len(), BUILTIN_MIGRATIONS.len());
        assert_eq!(registry.latest_version(), 2);
    }
}

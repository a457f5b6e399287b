//! Versioned schema migrations

use rusqlite::{Connection, OptionalExtension, Result};
use tracing::{error, info, warn};

/// Applies an ordered list of `(version, sql)` migrations to one connection.
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Create `schema_version` if needed, then apply every migration newer than the recorded
    /// version.
    pub fn initialize_database(&mut self, migrations: &[(i32, &str)]) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        info!("Current database schema version: {}", current_version);

        self.apply_migrations(migrations, current_version)
    }

    fn apply_migrations(&mut self, migrations: &[(i32, &str)], current_version: i32) -> Result<()> {
        for (version, migration_sql) in migrations.iter() {
            if *version <= current_version {
                continue;
            }
            info!("Applying migration {}...", version);

            let tx = self.conn.transaction()?;
            if let Err(e) = tx.execute_batch(migration_sql) {
                error!("Failed to apply migration {}: {}", version, e);
                return Err(e);
            }
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;

            info!("Migration {} applied successfully", version);
        }
        Ok(())
    }

    pub fn get_current_version(&self) -> Result<i32> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .or_else(|e| {
                warn!("Could not read schema version, assuming 0: {}", e);
                Ok(0)
            })
    }

    pub fn has_migration_applied(&self, version: i32) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM schema_version WHERE version = ?1",
                [version],
                |_| Ok(1),
            )
            .optional()
            .map(|result| result.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MIGRATIONS: &[(i32, &str)] = &[
        (1, "CREATE TABLE a (id INTEGER PRIMARY KEY);"),
        (2, "CREATE TABLE b (id INTEGER PRIMARY KEY);"),
    ];

    #[test]
    fn test_migrations_apply_once() {
        let mut conn = Connection::open_in_memory().unwrap();
        {
            let mut migrator = MigrationManager::new(&mut conn);
            migrator.initialize_database(TEST_MIGRATIONS).unwrap();
            assert_eq!(migrator.get_current_version().unwrap(), 2);
            assert!(migrator.has_migration_applied(1).unwrap());
        }
        // Re-running is a no-op rather than a "table already exists" failure.
        let mut migrator = MigrationManager::new(&mut conn);
        migrator.initialize_database(TEST_MIGRATIONS).unwrap();
        assert_eq!(migrator.get_current_version().unwrap(), 2);
    }

    #[test]
    fn test_failed_migration_is_not_recorded() {
        let mut conn = Connection::open_in_memory().unwrap();
        let broken: &[(i32, &str)] = &[(1, "CREATE TABLE ok (id INTEGER);"), (2, "NOT SQL AT ALL")];
        let mut migrator = MigrationManager::new(&mut conn);
        assert!(migrator.initialize_database(broken).is_err());
        assert!(migrator.has_migration_applied(1).unwrap());
        assert!(!migrator.has_migration_applied(2).unwrap());
    }
}

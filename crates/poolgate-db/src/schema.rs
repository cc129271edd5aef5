//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode for data integrity.
//! UUIDs are stored as strings. Enums are stored as strings with
//! ASSERT constraints for validation.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::{debug, info};

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1: initial table definitions
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Grants (capacity- and time-bounded access tokens)
-- =======================================================================
DEFINE TABLE access_grant SCHEMAFULL;
DEFINE FIELD token ON TABLE access_grant TYPE string;
DEFINE FIELD max_resources ON TABLE access_grant TYPE int \
    ASSERT $value >= 1;
DEFINE FIELD used_resources ON TABLE access_grant TYPE int DEFAULT 0 \
    ASSERT $value >= 0;
DEFINE FIELD expire_at ON TABLE access_grant TYPE datetime;
DEFINE FIELD status ON TABLE access_grant TYPE string \
    ASSERT $value IN ['Active', 'Disabled', 'Expired'];
DEFINE FIELD bound_client ON TABLE access_grant TYPE option<string>;
DEFINE FIELD bound_at ON TABLE access_grant TYPE option<datetime>;
DEFINE FIELD last_used_at ON TABLE access_grant TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE access_grant TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE access_grant TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_grant_token ON TABLE access_grant \
    COLUMNS token UNIQUE;
DEFINE INDEX idx_grant_status ON TABLE access_grant COLUMNS status;

-- =======================================================================
-- Pool resources (leasable credential units)
-- =======================================================================
DEFINE TABLE pool_resource SCHEMAFULL;
DEFINE FIELD handle ON TABLE pool_resource TYPE string;
DEFINE FIELD display_name ON TABLE pool_resource TYPE string;
DEFINE FIELD credential ON TABLE pool_resource TYPE string;
DEFINE FIELD pool_status ON TABLE pool_resource TYPE string \
    ASSERT $value IN ['Available', 'Disabled', 'Leased'];
DEFINE FIELD assigned_grant ON TABLE pool_resource TYPE option<string>;
DEFINE FIELD assigned_at ON TABLE pool_resource TYPE option<datetime>;
DEFINE FIELD last_used_at ON TABLE pool_resource TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE pool_resource TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE pool_resource TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_resource_handle ON TABLE pool_resource \
    COLUMNS handle UNIQUE;
DEFINE INDEX idx_resource_status ON TABLE pool_resource \
    COLUMNS pool_status;
DEFINE INDEX idx_resource_grant ON TABLE pool_resource \
    COLUMNS assigned_grant;

-- =======================================================================
-- Leases (one per grant x client identity)
-- =======================================================================
DEFINE TABLE lease SCHEMAFULL;
DEFINE FIELD grant_id ON TABLE lease TYPE string;
DEFINE FIELD client_identity ON TABLE lease TYPE string;
DEFINE FIELD active_resource ON TABLE lease TYPE option<string>;
DEFINE FIELD first_bound_at ON TABLE lease TYPE datetime;
DEFINE FIELD last_check_at ON TABLE lease TYPE datetime;
DEFINE INDEX idx_lease_grant_client ON TABLE lease \
    COLUMNS grant_id, client_identity UNIQUE;
DEFINE INDEX idx_lease_active_resource ON TABLE lease \
    COLUMNS active_resource;

-- =======================================================================
-- Lease audit trail (append-only)
-- =======================================================================
DEFINE TABLE lease_audit SCHEMAFULL
    PERMISSIONS
        FOR create FULL
        FOR select FULL
        FOR update NONE
        FOR delete NONE;
DEFINE FIELD grant_id ON TABLE lease_audit TYPE string;
DEFINE FIELD action ON TABLE lease_audit TYPE string \
    ASSERT $value IN ['Validate', 'Checkout', 'Rebind', 'Expire'];
DEFINE FIELD resource_id ON TABLE lease_audit TYPE option<string>;
DEFINE FIELD client_identity ON TABLE lease_audit TYPE option<string>;
DEFINE FIELD description ON TABLE lease_audit TYPE string;
DEFINE FIELD timestamp ON TABLE lease_audit TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_audit_grant_time ON TABLE lease_audit \
    COLUMNS grant_id, timestamp;
DEFINE INDEX idx_audit_time ON TABLE lease_audit COLUMNS timestamp;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum. A
/// migration and its tracking record commit together, so a crash
/// mid-way never leaves a half-applied version behind.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);
    debug!(current_version, "Schema version before migration");

    for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );

        let script = format!(
            "BEGIN TRANSACTION;\n{}\n\
             CREATE _migration SET version = $version, name = $name;\n\
             COMMIT TRANSACTION;",
            migration.sql
        );
        db.query(script)
            .bind(("version", migration.version))
            .bind(("name", migration.name.to_string()))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e,
                ))
            })?;

        info!(version = migration.version, "Migration applied");
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[0].version < window[1].version,
                "Migrations must be in ascending version order"
            );
        }
    }

    #[test]
    fn schema_defines_every_table() {
        for table in ["access_grant", "pool_resource", "lease", "lease_audit"] {
            assert!(
                SCHEMA_V1.contains(&format!("DEFINE TABLE {table} SCHEMAFULL")),
                "missing table {table}"
            );
        }
    }

    #[test]
    fn tokens_and_handles_are_unique() {
        assert!(SCHEMA_V1.contains("idx_grant_token ON TABLE access_grant COLUMNS token UNIQUE"));
        assert!(SCHEMA_V1.contains("COLUMNS handle UNIQUE"));
    }
}

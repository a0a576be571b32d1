use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

// `(latitude, longitude)` is the conflict target of every upsert, so it is
// the only key on the table. `id` comes from a sequence and is never updated.
const MIGRATIONS: &[Migration] = &[Migration {
    version: "0001_cached_locations",
    sql: r#"
CREATE SEQUENCE IF NOT EXISTS cached_locations_id_seq START 1;

CREATE TABLE IF NOT EXISTS cached_locations (
    id BIGINT NOT NULL DEFAULT nextval('cached_locations_id_seq'),
    latitude DOUBLE NOT NULL,
    longitude DOUBLE NOT NULL,
    interpolation_model TEXT NOT NULL,
    data_tier TEXT NOT NULL DEFAULT 'standard',
    source_dataset TEXT NOT NULL,
    country_code TEXT,
    cache_ttl_days INTEGER NOT NULL DEFAULT 30,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    PRIMARY KEY (latitude, longitude)
);
"#,
}];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            tracing::debug!(version = migration.version, "applying warm store migration");
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}

//! Database migrations.
//!
//! diesel-async intentionally avoids linking libpq (it speaks the wire
//! protocol itself via tokio-postgres), so `diesel_migrations`'s harness —
//! which only runs against the sync, libpq-backed `PgConnection` — isn't
//! available here. Migrations are instead embedded as plain SQL and applied
//! by hand through the same `tokio_postgres::Client` the rest of the pool
//! uses, tracked in a `__diesel_schema_migrations` table compatible with the
//! Diesel CLI so `diesel migration list` still reports accurate state.

use std::collections::HashSet;

use tracing::info;

use super::pg_tls::make_tls_connector;
use super::pool::DbError;
use super::util::pg_to_diesel_error;

static MIGRATION_FILES: &[(&str, &str)] = &[(
    "2024010100000",
    include_str!("../../migrations/2024010100000_initial_schema/up.sql"),
)];

/// Run pending migrations against `database_url`.
pub async fn run_migrations(database_url: &str, no_tls: bool) -> Result<(), DbError> {
    let (client, connection) = if no_tls {
        tokio_postgres::connect(database_url, tokio_postgres::NoTls)
            .await
            .map_err(pg_to_diesel_error)?
    } else {
        let tls = make_tls_connector();
        tokio_postgres::connect(database_url, tls)
            .await
            .map_err(pg_to_diesel_error)?
    };

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("migration connection closed with error: {e}");
        }
    });

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS __diesel_schema_migrations (
                version VARCHAR(50) PRIMARY KEY NOT NULL,
                run_on TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            &[],
        )
        .await
        .map_err(pg_to_diesel_error)?;

    let rows = client
        .query("SELECT version FROM __diesel_schema_migrations", &[])
        .await
        .map_err(pg_to_diesel_error)?;
    let applied: HashSet<String> = rows.iter().map(|row| row.get::<_, String>(0)).collect();

    let mut ran = 0;
    for (version, sql) in MIGRATION_FILES {
        if applied.contains(*version) {
            continue;
        }

        info!("applying migration: {version}");
        for stmt in split_sql_statements(sql) {
            let stmt = stmt.trim();
            let is_comment_only = stmt
                .lines()
                .all(|line| line.trim().is_empty() || line.trim().starts_with("--"));
            if stmt.is_empty() || is_comment_only {
                continue;
            }
            client.execute(stmt, &[]).await.map_err(|e| {
                tracing::error!("migration {version} failed on:\n{stmt}\nerror: {e}");
                pg_to_diesel_error(e)
            })?;
        }

        client
            .execute(
                "INSERT INTO __diesel_schema_migrations (version) VALUES ($1)",
                &[version],
            )
            .await
            .map_err(pg_to_diesel_error)?;

        ran += 1;
    }

    if ran == 0 {
        info!("no pending migrations");
    } else {
        info!("applied {ran} migration(s)");
    }

    Ok(())
}

/// Split SQL statements on top-level semicolons, treating `$$ ... $$`
/// dollar-quoted bodies as opaque so function/procedure definitions survive.
fn split_sql_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut current_start = 0;
    let mut in_dollar_quote = false;

    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if i + 1 < bytes.len() && bytes[i] == b'$' && bytes[i + 1] == b'$' {
            in_dollar_quote = !in_dollar_quote;
            i += 2;
            continue;
        }

        if bytes[i] == b';' && !in_dollar_quote {
            let stmt = &sql[current_start..i];
            if !stmt.trim().is_empty() {
                statements.push(stmt);
            }
            current_start = i + 1;
        }

        i += 1;
    }

    if current_start < sql.len() {
        let stmt = &sql[current_start..];
        if !stmt.trim().is_empty() {
            statements.push(stmt);
        }
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_statements_on_semicolons() {
        let sql = "CREATE TABLE a (id INT); CREATE TABLE b (id INT);";
        assert_eq!(split_sql_statements(sql).len(), 2);
    }

    #[test]
    fn keeps_dollar_quoted_bodies_intact() {
        let sql = "CREATE FUNCTION f() RETURNS void AS $$ BEGIN SELECT 1; END; $$ LANGUAGE plpgsql;";
        assert_eq!(split_sql_statements(sql).len(), 1);
    }
}

//! Database schema migrations.

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// Called during database initialization. The whole schema is applied in
/// one `BEGIN IMMEDIATE` transaction of `CREATE ... IF NOT EXISTS`
/// statements, so API and worker processes opening a fresh file at once
/// serialize on the write lock instead of racing.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(DatabaseError::Query)?;

    create_base_schema(&tx)?;
    run_document_embeddings_migration(&tx)?;

    tx.commit().map_err(DatabaseError::Query)?;
    Ok(())
}

fn create_base_schema(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        r#"
        -- Documents table
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            storage_key TEXT NOT NULL UNIQUE,
            filename TEXT NOT NULL,
            content_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            description TEXT,
            tag_status TEXT NOT NULL DEFAULT 'pending',
            tag_status_error TEXT,
            tag_status_updated_at TEXT NOT NULL,
            embedding_status TEXT NOT NULL DEFAULT 'pending',
            embedding_status_error TEXT,
            embedding_status_updated_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id);

        -- Tags; labels are unique regardless of case
        CREATE TABLE IF NOT EXISTS tags (
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL UNIQUE COLLATE NOCASE,
            description TEXT,
            embedding BLOB,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Document tags (many-to-many)
        CREATE TABLE IF NOT EXISTS document_tags (
            document_id TEXT NOT NULL,
            tag_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (document_id, tag_id),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_document_tags_tag ON document_tags(tag_id);

        -- Summaries generated on request
        CREATE TABLE IF NOT EXISTS summaries (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            content TEXT NOT NULL,
            model TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_summaries_document ON summaries(document_id);

        -- Message queue state
        CREATE TABLE IF NOT EXISTS queue_messages (
            id TEXT PRIMARY KEY,
            queue TEXT NOT NULL,
            body TEXT NOT NULL,
            receive_count INTEGER NOT NULL DEFAULT 0,
            visible_at INTEGER NOT NULL,
            receipt TEXT,
            dead_lettered_at TEXT,
            last_error TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_queue_messages_ready
            ON queue_messages(queue, dead_lettered_at, visible_at);
        "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: format!("Failed to create base schema: {}", e),
    })?;

    Ok(())
}

/// Migration: one embedding per document for retrieval
fn run_document_embeddings_migration(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        r#"
        -- Embeddings are BLOBs of little-endian f32; search is a brute-force scan
        CREATE TABLE IF NOT EXISTS document_embeddings (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL UNIQUE,
            chunk_text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );
        "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: format!("Failed to create document_embeddings table: {}", e),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let columns: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('documents') WHERE name LIKE 'embedding_status%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(columns, 3);
    }

    #[test]
    fn test_concurrent_open_of_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docmanager.db");

        let openers: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let conn = Connection::open(&path).unwrap();
                    conn.execute_batch("PRAGMA busy_timeout=5000;").unwrap();
                    run_migrations(&conn)
                })
            })
            .collect();

        for opener in openers {
            opener.join().unwrap().unwrap();
        }

        let conn = Connection::open(&path).unwrap();
        let status: String = conn
            .query_row(
                "SELECT dflt_value FROM pragma_table_info('documents') WHERE name = 'embedding_status'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "'pending'");
    }
}

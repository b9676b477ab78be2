use rusqlite::Connection;

pub fn apply(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            user_id TEXT NOT NULL,
            entry_id TEXT NOT NULL,
            body TEXT NOT NULL,
            date_created INTEGER NOT NULL,
            date_modified INTEGER NOT NULL,
            PRIMARY KEY (user_id, entry_id)
        );

        CREATE INDEX IF NOT EXISTS entries_by_user_modified
            ON entries(user_id, date_modified);
        "#,
    )
}

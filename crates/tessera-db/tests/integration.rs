use tessera_db::{create_pool, run_migrations, DbRuntimeSettings};

#[test]
fn file_backed_pool_shares_schema_across_connections() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let db_path = dir.path().join("ledger.db");
    let pool = create_pool(
        db_path.to_str().expect("utf-8 temp path"),
        DbRuntimeSettings::default(),
    )
    .expect("failed to create pool");

    {
        let conn = pool.get().expect("failed to get connection");
        let applied = run_migrations(&conn).expect("failed to run migrations");
        assert_eq!(applied, 4);
    }

    // A second connection must see the schema created by the first one.
    let first = pool.get().expect("failed to get first connection");
    let second = pool.get().expect("failed to get second connection");
    drop(first);

    let mut stmt = second
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .expect("failed to prepare table query");
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .expect("failed to execute table query")
        .map(|r| r.expect("failed to read table name"))
        .collect();

    assert_eq!(
        tables,
        vec![
            "_tessera_migrations".to_string(),
            "results".to_string(),
            "tagged_results".to_string(),
            "tags".to_string(),
        ]
    );
}

#[test]
fn deleting_a_tag_cascades_to_its_links() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let db_path = dir.path().join("ledger.db");
    let pool = create_pool(
        db_path.to_str().expect("utf-8 temp path"),
        DbRuntimeSettings::default(),
    )
    .expect("failed to create pool");
    let conn = pool.get().expect("failed to get connection");
    run_migrations(&conn).expect("failed to run migrations");

    conn.execute_batch(
        "INSERT INTO results (object_id, client_id, filename) VALUES ('o1', 'c1', 'a.bin');
         INSERT INTO tags (tag_name, project_id) VALUES ('t', 'p1');
         INSERT INTO tagged_results (tag_id, result_id) VALUES (1, 1);
         DELETE FROM tags WHERE project_id = 'p1';",
    )
    .expect("seed and delete should succeed");

    let links: i64 = conn
        .query_row("SELECT COUNT(*) FROM tagged_results", [], |row| row.get(0))
        .expect("should count links");
    assert_eq!(links, 0, "links must cascade with their tag");

    let results: i64 = conn
        .query_row("SELECT COUNT(*) FROM results", [], |row| row.get(0))
        .expect("should count results");
    assert_eq!(results, 1, "results are not owned by tags");
}

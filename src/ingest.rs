// MIT License
// Copyright (c) 2025 Copydesk Authors

use std::fs;
use std::path;

use anyhow::Context;
use rusqlite::OptionalExtension;

use crate::article::Article;
use crate::db;
use crate::worklist;

pub fn run(db_path: &str, dir: &str) -> anyhow::Result<()> {
    let conn = db::open(db_path)?;
    let mut posts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let filepath = entry?.path();
        if filepath.is_file() {
            posts.push(filepath);
        }
    }
    println!("Ingesting {} documents from {dir} into {db_path}", posts.len());

    // This is so fast we don't need to show progress
    for filepath in posts {
        ingest_file(&conn, &filepath)?;
    }
    Ok(())
}

// - Parse the document, front matter or not
// - Upsert it into article, keyed by filename
// - Upsert the chunks into topic_embedding, dropping embeddings whose text changed
// - Queue it on the worklist
pub fn ingest_file(conn: &rusqlite::Connection, filepath: &path::Path) -> anyhow::Result<Article> {
    let contents =
        fs::read_to_string(filepath).with_context(|| format!("{}", filepath.display()))?;
    let article = Article::parse(filepath, &contents);

    let mut stmt = conn.prepare(
        r#"INSERT INTO article (filename, title, url, date, is_draft, body)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(filename) DO UPDATE SET
            title = excluded.title, url = excluded.url, date = excluded.date,
            is_draft = excluded.is_draft, body = excluded.body
        RETURNING (id)"#,
    )?;
    let article_id = stmt
        .query_row(
            (
                filepath.to_string_lossy(),
                &article.title,
                &article.url,
                article.date,
                article.is_draft,
                &article.body,
            ),
            |row| row.get::<_, usize>(0),
        )
        .with_context(|| format!("filename={}", filepath.display()))?;

    // If the chunk text hasn't changed keep the row, the embedding is paid for
    let mut exists_stmt = conn
        .prepare("SELECT chunk_id FROM topic_embedding WHERE article_id = ?1 AND text = ?2")?;
    let mut chunk_stmt = conn.prepare(
        r#"INSERT INTO topic_embedding (article_id, chunk_id, text)
           VALUES (?1, ?2, ?3)
           ON CONFLICT(article_id, chunk_id) DO UPDATE SET
               text = excluded.text, embed = NULL"#,
    )?;
    for (idx, c) in article.chunks.iter().enumerate() {
        let maybe_chunk_id = exists_stmt
            .query_row((article_id, c), |row| row.get::<_, usize>(0))
            .optional()?;
        if maybe_chunk_id.is_none() {
            chunk_stmt.execute((article_id, idx, c))?;
        }
    }
    // A shorter re-ingest leaves no stale tail chunks behind
    conn.execute(
        "DELETE FROM topic_embedding WHERE article_id = ?1 AND chunk_id >= ?2",
        (article_id, article.chunks.len()),
    )?;

    worklist::enqueue(conn, article_id)?;
    tracing::debug!(article_id, file = %filepath.display(), "ingested");
    Ok(article)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &path::Path, name: &str, contents: &str) -> path::PathBuf {
        let p = dir.join(name);
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        p
    }

    #[test]
    fn ingests_with_and_without_front_matter() {
        let conn = db::open_in_memory();
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.md", "---\ntitle: With\n---\nBody A.\n");
        let b = write_file(dir.path(), "b.md", "Plain title line\nBody B.\n");

        ingest_file(&conn, &a).unwrap();
        ingest_file(&conn, &b).unwrap();

        let titles: Vec<String> = {
            let mut stmt = conn.prepare("SELECT title FROM article ORDER BY id").unwrap();
            stmt.query_map((), |r| r.get(0))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap()
        };
        assert_eq!(titles, vec!["With", "Plain title line"]);

        let pending = worklist::with_status(&conn, worklist::Status::Pending).unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn reingest_updates_in_place() {
        let conn = db::open_in_memory();
        let dir = tempfile::tempdir().unwrap();
        let p = write_file(dir.path(), "a.md", "---\ntitle: First\n---\nBody.\n");
        ingest_file(&conn, &p).unwrap();
        write_file(dir.path(), "a.md", "---\ntitle: Second\n---\nBody.\n");
        ingest_file(&conn, &p).unwrap();

        let count: usize = conn
            .query_row("SELECT COUNT(*) FROM article", (), |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let title: String = conn
            .query_row("SELECT title FROM article", (), |r| r.get(0))
            .unwrap();
        assert_eq!(title, "Second");
    }

    #[test]
    fn unchanged_chunk_keeps_its_embedding() {
        let conn = db::open_in_memory();
        let dir = tempfile::tempdir().unwrap();
        let p = write_file(dir.path(), "a.md", "---\ntitle: Keep\n---\nStable body.\n");
        let article = ingest_file(&conn, &p).unwrap();
        assert_eq!(article.chunks.len(), 1);

        conn.execute(
            "UPDATE topic_embedding SET embed = ?1",
            [db::f64_vec_to_u8_vec(vec![1.0, 2.0])],
        )
        .unwrap();
        ingest_file(&conn, &p).unwrap();

        let embed: Option<Vec<u8>> = conn
            .query_row("SELECT embed FROM topic_embedding", (), |r| r.get(0))
            .unwrap();
        assert!(embed.is_some(), "embedding was dropped on an unchanged chunk");
    }

    #[test]
    fn changed_chunk_text_clears_the_embedding() {
        let conn = db::open_in_memory();
        let dir = tempfile::tempdir().unwrap();
        let p = write_file(dir.path(), "a.md", "---\ntitle: Change\n---\nOld body.\n");
        ingest_file(&conn, &p).unwrap();
        conn.execute(
            "UPDATE topic_embedding SET embed = ?1",
            [db::f64_vec_to_u8_vec(vec![1.0])],
        )
        .unwrap();

        write_file(dir.path(), "a.md", "---\ntitle: Change\n---\nNew body.\n");
        ingest_file(&conn, &p).unwrap();

        let embed: Option<Vec<u8>> = conn
            .query_row("SELECT embed FROM topic_embedding", (), |r| r.get(0))
            .unwrap();
        assert!(embed.is_none(), "stale embedding survived a text change");
    }
}

// MIT License
// Copyright (c) 2025 Copydesk Authors

use std::fmt;
use std::str;

use rusqlite::OptionalExtension;

/// Where an article sits in the processing queue.
///
/// Ingest enqueues at `Pending`; proofreading moves to `Proofread`, or
/// `Blocked` when an issue has blocks_publish set; the optimization pass
/// finishes at `Optimized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Proofread,
    Blocked,
    Optimized,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Proofread => "proofread",
            Status::Blocked => "blocked",
            Status::Optimized => "optimized",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl str::FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "proofread" => Ok(Status::Proofread),
            "blocked" => Ok(Status::Blocked),
            "optimized" => Ok(Status::Optimized),
            other => Err(anyhow::anyhow!("unknown worklist status {other:?}")),
        }
    }
}

/// Queue an article for processing. Re-ingesting resets it to pending.
pub fn enqueue(conn: &rusqlite::Connection, article_id: usize) -> anyhow::Result<()> {
    let now = chrono::Utc::now();
    conn.execute(
        r#"INSERT INTO worklist (article_id, status, queued_at, updated_at)
           VALUES (?1, ?2, ?3, ?3)
           ON CONFLICT(article_id) DO UPDATE SET
               status = excluded.status, updated_at = excluded.updated_at"#,
        (article_id, Status::Pending.as_str(), now),
    )?;
    Ok(())
}

pub fn set_status(
    conn: &rusqlite::Connection,
    article_id: usize,
    status: Status,
) -> anyhow::Result<()> {
    let changed = conn.execute(
        "UPDATE worklist SET status = ?1, updated_at = ?2 WHERE article_id = ?3",
        (status.as_str(), chrono::Utc::now(), article_id),
    )?;
    if changed == 0 {
        return Err(anyhow::anyhow!("article {article_id} is not on the worklist"));
    }
    Ok(())
}

/// Article ids queued with the given status, oldest first.
pub fn with_status(
    conn: &rusqlite::Connection,
    status: Status,
) -> anyhow::Result<Vec<usize>> {
    let mut stmt = conn.prepare(
        "SELECT article_id FROM worklist WHERE status = ?1 ORDER BY queued_at, article_id",
    )?;
    let ids = stmt
        .query_map([status.as_str()], |row| row.get::<_, usize>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn get_status(
    conn: &rusqlite::Connection,
    article_id: usize,
) -> anyhow::Result<Option<Status>> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM worklist WHERE article_id = ?1",
            [article_id],
            |row| row.get(0),
        )
        .optional()?;
    status.as_deref().map(str::parse).transpose()
}

/// (status, count) pairs for the status display.
pub fn summary(conn: &rusqlite::Connection) -> anyhow::Result<Vec<(String, usize)>> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM worklist GROUP BY status ORDER BY status",
    )?;
    let counts = stmt
        .query_map((), |row| Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(counts)
}

pub fn run_status(db_path: &str) -> anyhow::Result<()> {
    let conn = crate::db::open(db_path)?;
    let counts = summary(&conn)?;
    if counts.is_empty() {
        println!("Worklist is empty, ingest a directory first");
        return Ok(());
    }
    for (status, count) in &counts {
        println!("{status}: {count}");
    }
    println!();

    let mut stmt = conn.prepare(
        r#"SELECT a.id, a.title, w.status,
                  (SELECT COUNT(*) FROM issue i WHERE i.article_id = a.id),
                  (SELECT COUNT(*) FROM issue i WHERE i.article_id = a.id AND i.blocks_publish)
           FROM worklist w
           JOIN article a ON a.id = w.article_id
           ORDER BY a.id"#,
    )?;
    let rows = stmt.query_map((), |row| {
        Ok((
            row.get::<_, usize>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, usize>(3)?,
            row.get::<_, usize>(4)?,
        ))
    })?;
    for row in rows {
        let (id, title, status, issues, blocking) = row?;
        if blocking > 0 {
            println!("{id:>4}  {status:<10} {issues} issues ({blocking} blocking)  {title}");
        } else {
            println!("{id:>4}  {status:<10} {issues} issues  {title}");
        }
    }
    Ok(())
}

// MIT License
// Copyright (c) 2025 Copydesk Authors

// We don't enforce a unique URL because draft articles may not have decided on the slug yet
pub const CREATE_ARTICLE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS article (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    date DATETIME NULL,
    filename TEXT NOT NULL,
    is_draft BOOL NOT NULL,
    body TEXT NOT NULL,
    UNIQUE (filename)
)
"#;

// One row per embedding chunk. embed stays NULL until `similar embed` runs.
pub const CREATE_TOPIC_EMBEDDING_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS topic_embedding (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL,
    chunk_id INTEGER NOT NULL,
    text TEXT NOT NULL,
    embed BLOB NULL,
    FOREIGN KEY (article_id) REFERENCES article (id),
    UNIQUE (article_id, chunk_id)
)
"#;

pub const CREATE_SIMILARITY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS article_similarity (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_a INTEGER NOT NULL,
    article_b INTEGER NOT NULL,
    similarity REAL NOT NULL,
    FOREIGN KEY (article_a) REFERENCES article (id),
    FOREIGN KEY (article_b) REFERENCES article (id),
    UNIQUE (article_a, article_b)
)
"#;

pub const CREATE_ISSUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS issue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL,
    rule TEXT NOT NULL,
    severity TEXT NOT NULL,
    message TEXT NOT NULL,
    quote TEXT NOT NULL,
    suggestion TEXT NULL,
    blocks_publish BOOL NOT NULL,
    engine TEXT NOT NULL,
    created DATETIME NOT NULL,
    FOREIGN KEY (article_id) REFERENCES article (id)
)
"#;

pub const CREATE_SEO_SUGGESTION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS seo_suggestion (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    created DATETIME NOT NULL,
    FOREIGN KEY (article_id) REFERENCES article (id)
)
"#;

pub const CREATE_FAQ_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS faq (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL,
    question TEXT NOT NULL,
    answer TEXT NOT NULL,
    created DATETIME NOT NULL,
    FOREIGN KEY (article_id) REFERENCES article (id)
)
"#;

// One reviewer verdict per issue, later verdicts replace earlier ones
pub const CREATE_DECISION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS decision (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id INTEGER NOT NULL,
    verdict TEXT NOT NULL,
    note TEXT NULL,
    created DATETIME NOT NULL,
    FOREIGN KEY (issue_id) REFERENCES issue (id),
    UNIQUE (issue_id)
)
"#;

pub const CREATE_SUPPRESSED_RULE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS suppressed_rule (
    rule TEXT PRIMARY KEY,
    reject_rate REAL NOT NULL,
    decided_at DATETIME NOT NULL
)
"#;

pub const CREATE_WORKLIST_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS worklist (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL,
    status TEXT NOT NULL,
    queued_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL,
    FOREIGN KEY (article_id) REFERENCES article (id),
    UNIQUE (article_id)
)
"#;

const ALL_TABLES: [&str; 9] = [
    CREATE_ARTICLE_TABLE,
    CREATE_TOPIC_EMBEDDING_TABLE,
    CREATE_SIMILARITY_TABLE,
    CREATE_ISSUE_TABLE,
    CREATE_SEO_SUGGESTION_TABLE,
    CREATE_FAQ_TABLE,
    CREATE_DECISION_TABLE,
    CREATE_SUPPRESSED_RULE_TABLE,
    CREATE_WORKLIST_TABLE,
];

/// Open the database, creating any missing tables.
pub fn open(db_path: &str) -> anyhow::Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(db_path)?;
    apply_schema(&conn)?;
    Ok(conn)
}

pub fn apply_schema(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    for create in ALL_TABLES {
        conn.execute(create, ())?;
    }
    Ok(())
}

pub fn f64_vec_to_u8_vec(vec: Vec<f64>) -> Vec<u8> {
    let mut u8_vec: Vec<u8> = Vec::with_capacity(vec.len() * std::mem::size_of::<f64>());
    for num in vec {
        u8_vec.extend_from_slice(&num.to_ne_bytes());
    }
    u8_vec
}

pub fn u8_vec_to_f64_vec(vec: Vec<u8>) -> Vec<f64> {
    assert_eq!(vec.len() % std::mem::size_of::<f64>(), 0);
    let mut f64_vec: Vec<f64> = Vec::with_capacity(vec.len() / std::mem::size_of::<f64>());
    for chunk in vec.chunks_exact(std::mem::size_of::<f64>()) {
        let num = f64::from_ne_bytes(chunk.try_into().expect("slice with incorrect length"));
        f64_vec.push(num);
    }
    f64_vec
}

#[cfg(test)]
pub fn open_in_memory() -> rusqlite::Connection {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    apply_schema(&conn).unwrap();
    conn
}

// MIT License
// Copyright (c) 2025 Copydesk Authors

use std::collections::HashMap;
use std::env;
use std::fs;
use std::fs::File;
use std::io;
use std::io::Write;
use std::path;
use std::process;

use anyhow::Context;

use crate::article::Article;
use crate::db;
use crate::front_matter::FrontMatter;
use crate::openai;

const MIN_SIMILARITY: f64 = 0.4;
const RELATED_COUNT: usize = 3;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Call the embedding model for each chunk that doesn't have a vector
    /// yet. This part costs money and requires an OpenAI API key in
    /// environment variable OPENAI_API_KEY
    Embed,

    /// Iterate all the articles comparing them pair-wise and store the
    /// results in the db
    Calc,

    /// Show the articles closest to the given one
    Query {
        /// The article id to search around
        #[clap(long)]
        article: usize,
        /// How many neighbours to show
        #[clap(long, default_value_t = 5)]
        limit: usize,
    },

    /// Write a list of related articles to the front matter of each
    /// ingested article. Backup your files first!
    Write {
        /// Do no backup the file as a .BAK
        #[clap(long)]
        no_backup: bool,
        /// Don't actually change anything, print the changes to stdout
        #[clap(long)]
        dry_run: bool,
    },
}

pub fn run(db_path: &str, cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Embed => do_embed(db_path),
        Commands::Calc => do_calc(db_path),
        Commands::Query { article, limit } => do_query(db_path, article, limit),
        Commands::Write { no_backup, dry_run } => do_write(db_path, dry_run, !no_backup),
    }
}

fn do_embed(db_path: &str) -> anyhow::Result<()> {
    if env::var("OPENAI_API_KEY").is_err() {
        eprintln!("Set variable OPENAI_API_KEY to your key");
        process::exit(2);
    }
    let mut db_conn = db::open(db_path)?;

    let articles = load_all_active_articles(&db_conn)?;
    let total = articles.len();
    println!("Embedding {total} non-draft articles");

    let width = get_terminal_width();
    let mut stdout = io::stdout();
    for (idx, article) in articles.into_iter().enumerate() {
        let progress = format!("{} / {total}", idx + 1);
        let spaces =
            " ".repeat(width.saturating_sub(article.title.len() + progress.len() + 2));
        write!(stdout, "\r[{}{spaces}{progress}]", article.title)?;
        stdout.flush()?;

        let tx = db_conn.transaction()?;
        let mut stmt = tx.prepare(
            "UPDATE topic_embedding SET embed = ?1 WHERE chunk_id = ?2 AND article_id = ?3",
        )?;
        let chunks = load_embed_chunks(&tx, article.id)?;
        for (chunk_id, text, current_embed) in chunks {
            if !current_embed.is_empty() {
                // embeds cost money, don't recalculate existing ones
                continue;
            }
            let embed = openai::embed(&text)?;
            stmt.execute((db::f64_vec_to_u8_vec(embed), chunk_id, article.id))?;
        }
        stmt.finalize()?;
        tx.commit()?;
    }
    println!();
    Ok(())
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> anyhow::Result<f64> {
    if a.len() != b.len() {
        return Err(anyhow::anyhow!(
            "embedding lengths differ: {} vs {}",
            a.len(),
            b.len()
        ));
    }

    let dot_product: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();

    let magnitude_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let magnitude_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    Ok(dot_product / (magnitude_a * magnitude_b))
}

fn do_calc(db_path: &str) -> anyhow::Result<()> {
    let mut db_conn = db::open(db_path)?;
    let count = calc(&mut db_conn)?;
    println!("Stored {count} article pair similarities");
    Ok(())
}

pub fn calc(db_conn: &mut rusqlite::Connection) -> anyhow::Result<usize> {
    let articles = load_all_active_articles(db_conn)?;
    println!(
        "Calculating similarity for {} non-draft articles",
        articles.len()
    );

    let mut count = 0;
    for (idx, a) in articles.iter().enumerate() {
        // Do one article at a time
        let tx = db_conn.transaction()?;
        let mut stmt = tx.prepare(
            r#"INSERT INTO article_similarity (article_a, article_b, similarity)
               VALUES (?1, ?2, ?3)
               ON CONFLICT DO UPDATE SET similarity = excluded.similarity
            "#,
        )?;
        for b in articles.iter().skip(idx + 1) {
            let Some(similarity) = compare_articles(&tx, a, b)? else {
                // One side has no embedded chunks yet
                continue;
            };
            stmt.execute((a.id, b.id, similarity))?;
            tracing::debug!(a = a.id, b = b.id, similarity, "pair scored");
            count += 1;
        }
        stmt.finalize()?;
        tx.commit()?;
    }

    Ok(count)
}

fn do_query(db_path: &str, article_id: usize, limit: usize) -> anyhow::Result<()> {
    let db_conn = db::open(db_path)?;
    let title: String = db_conn
        .query_row("SELECT title FROM article WHERE id = ?1", [article_id], |r| {
            r.get(0)
        })
        .with_context(|| format!("article {article_id}"))?;
    println!("Articles similar to: {title}");
    for (id, title, similarity) in query(&db_conn, article_id, limit)? {
        println!("{similarity:.3}  {id:>4}  {title}");
    }
    Ok(())
}

/// The closest non-draft articles, best first. The pair table stores each
/// unordered pair once so both orientations are matched.
pub fn query(
    db_conn: &rusqlite::Connection,
    article_id: usize,
    limit: usize,
) -> anyhow::Result<Vec<(usize, String, f64)>> {
    let mut stmt = db_conn.prepare(
        r#"
        SELECT a.id, a.title, s.similarity
        FROM article_similarity s, article a
        WHERE NOT a.is_draft
         AND ((s.article_a = ?1 AND s.article_b = a.id) OR (s.article_a = a.id AND s.article_b = ?1))
        ORDER BY s.similarity DESC
        LIMIT ?2"#,
    )?;
    let results = stmt
        .query_map((article_id, limit), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(results)
}

fn do_write(db_path: &str, is_dry_run: bool, is_backup: bool) -> anyhow::Result<()> {
    let db_conn = db::open(db_path)?;
    let written = write_related(&db_conn, is_dry_run, is_backup)?;
    println!("\nUpdated {written} articles");
    Ok(())
}

pub fn write_related(
    db_conn: &rusqlite::Connection,
    is_dry_run: bool,
    is_backup: bool,
) -> anyhow::Result<usize> {
    let articles = load_all_active_articles(db_conn)?;
    println!(
        "Calculating related articles for {} non-draft articles",
        articles.len()
    );
    let width = if is_dry_run { get_terminal_width() } else { 0 };

    let mut written_count = 0;
    for article in articles {
        let mut related = Vec::new();
        for (id, _, similarity) in query(db_conn, article.id, RELATED_COUNT)? {
            if similarity < MIN_SIMILARITY {
                continue;
            }
            let filename: String = db_conn.query_row(
                "SELECT filename FROM article WHERE id = ?1",
                [id],
                |row| row.get(0),
            )?;
            let p = path::PathBuf::from(filename);
            let Some(os_name) = p.file_name() else {
                continue;
            };
            related.push(os_name.to_string_lossy().to_string());
        }

        if related.is_empty() {
            // No other articles are similar enough
            continue;
        }

        let contents = fs::read_to_string(&article.filename)
            .with_context(|| format!("{}", article.filename.display()))?;
        let Some(fenced) = FrontMatter::select(&contents) else {
            // Plain files only gain front matter through the optimizer
            continue;
        };
        let mut fm: HashMap<String, serde_yaml::Value> =
            serde_yaml::from_str(&fenced.join("\n"))
                .with_context(|| format!("{}", article.filename.display()))?;
        if fm.contains_key("related") {
            // Don't overwrite existing related articles
            continue;
        }
        let body: String = contents
            .lines()
            .skip(fenced.len() + 2) // Add the two dashes lines we must also skip
            .collect::<Vec<&str>>()
            .join("\n");

        fm.insert(
            "related".to_string(),
            serde_yaml::Value::Sequence(
                related.into_iter().map(serde_yaml::Value::String).collect(),
            ),
        );
        let y = serde_yaml::to_string(&fm)?;

        let mut writer: Box<dyn io::Write> = if is_dry_run {
            let article_changed = article.filename.file_name().unwrap().to_string_lossy();
            let spaces = "+".repeat(width.saturating_sub(article_changed.len() + 2) / 2);
            println!("\n\n{spaces} {article_changed} {spaces}");
            Box::new(io::stdout())
        } else if is_backup {
            let mut bak = article.filename.clone();
            bak.set_extension("BAK");
            fs::rename(&article.filename, bak)?;
            Box::new(File::create_new(&article.filename)?)
        } else {
            Box::new(File::create(&article.filename)?)
        };
        writeln!(writer, "---")?;
        write!(writer, "{y}")?;
        writeln!(writer, "---")?;
        write!(writer, "{body}")?;

        written_count += 1;
    }

    Ok(written_count)
}

// Does not include draft articles
fn load_all_active_articles(db_conn: &rusqlite::Connection) -> anyhow::Result<Vec<Article>> {
    let mut stmt = db_conn.prepare(
        "SELECT id, title, url, date, filename FROM article WHERE NOT is_draft ORDER BY id",
    )?;
    let article_iter = stmt.query_map((), |row| {
        let id: usize = row.get(0)?;
        let title: String = row.get(1)?;
        let url: String = row.get(2)?;
        let date: Option<String> = row.get(3)?; // Dates are stored as strings in SQLite
        let filename: String = row.get(4)?;

        let date = date
            .as_deref()
            .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok());

        Ok(Article {
            id,
            title,
            url,
            date,
            filename: path::PathBuf::from(filename),
            is_draft: false,
            body: String::new(),
            chunks: vec![],
        })
    })?;

    let mut articles = Vec::new();
    for article in article_iter {
        articles.push(article?);
    }
    Ok(articles)
}

/// Mean cosine similarity over the cross product of the two articles'
/// embedded chunks, or None when either side has nothing embedded yet.
fn compare_articles(
    db_conn: &rusqlite::Connection,
    a: &Article,
    b: &Article,
) -> anyhow::Result<Option<f64>> {
    let a_chunks = load_embed_chunks(db_conn, a.id)?;
    let b_chunks = load_embed_chunks(db_conn, b.id)?;
    let mut simis = Vec::new();
    for (_, _, a_embedding) in a_chunks.into_iter() {
        if a_embedding.is_empty() {
            continue;
        }
        for (_, _, b_embedding) in b_chunks.iter() {
            if b_embedding.is_empty() {
                continue;
            }
            simis.push(cosine_similarity(&a_embedding, b_embedding)?);
        }
    }
    if simis.is_empty() {
        return Ok(None);
    }
    Ok(Some(simis.iter().sum::<f64>() / simis.len() as f64))
}

fn load_embed_chunks(
    db_conn: &rusqlite::Connection,
    article_id: usize,
) -> anyhow::Result<Vec<(usize, String, Vec<f64>)>> {
    let mut out = Vec::new();
    let mut stmt = db_conn
        .prepare("SELECT chunk_id, text, embed FROM topic_embedding WHERE article_id = ?1")?;
    let mut rows = stmt.query(rusqlite::params![article_id])?;
    while let Some(row) = rows.next()? {
        let chunk_id: usize = row.get(0)?;
        let text: String = row.get(1)?;
        let blob: Option<Vec<u8>> = row.get(2)?;
        out.push((
            chunk_id,
            text,
            blob.map(db::u8_vec_to_f64_vec).unwrap_or_default(),
        ));
    }
    Ok(out)
}

#[repr(C)]
struct Winsize {
    ws_row: u16,
    ws_col: u16,
    ws_xpixel: u16,
    ws_ypixel: u16,
}

fn get_terminal_width() -> usize {
    let mut winsize: Winsize = unsafe { std::mem::zeroed() };
    let fd = 0; // standard input
    if unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut winsize) } == -1 {
        return 80;
    }
    winsize.ws_col as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_article(conn: &rusqlite::Connection, name: &str, embeds: &[Vec<f64>]) -> usize {
        conn.execute(
            "INSERT INTO article (title, url, filename, is_draft, body) VALUES (?1, '', ?2, false, '')",
            (name, name),
        )
        .unwrap();
        let id = conn.last_insert_rowid() as usize;
        for (chunk_id, v) in embeds.iter().enumerate() {
            conn.execute(
                "INSERT INTO topic_embedding (article_id, chunk_id, text, embed) VALUES (?1, ?2, 'text', ?3)",
                (id, chunk_id, db::f64_vec_to_u8_vec(v.clone())),
            )
            .unwrap();
        }
        id
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, 0.4, 0.5];
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-9);
    }

    #[test]
    fn cosine_length_mismatch_is_an_error() {
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn calc_and_query_rank_by_similarity() {
        let mut conn = db::open_in_memory();
        let a = seed_article(&conn, "a.md", &[vec![1.0, 0.0]]);
        let close = seed_article(&conn, "close.md", &[vec![0.9, 0.1]]);
        let far = seed_article(&conn, "far.md", &[vec![0.0, 1.0]]);

        let pairs = calc(&mut conn).unwrap();
        assert_eq!(pairs, 3);

        let neighbours = query(&conn, a, 5).unwrap();
        assert_eq!(neighbours.len(), 2);
        assert_eq!(neighbours[0].0, close);
        assert_eq!(neighbours[1].0, far);
        assert!(neighbours[0].2 > neighbours[1].2);
    }

    #[test]
    fn query_matches_both_pair_orientations() {
        let mut conn = db::open_in_memory();
        let a = seed_article(&conn, "a.md", &[vec![1.0, 0.0]]);
        let b = seed_article(&conn, "b.md", &[vec![1.0, 0.1]]);
        calc(&mut conn).unwrap();

        // The pair is stored once, as (a, b)
        let from_a = query(&conn, a, 5).unwrap();
        let from_b = query(&conn, b, 5).unwrap();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_b.len(), 1);
        assert_eq!(from_a[0].0, b);
        assert_eq!(from_b[0].0, a);
    }

    #[test]
    fn unembedded_articles_get_no_pair_rows() {
        let mut conn = db::open_in_memory();
        seed_article(&conn, "a.md", &[vec![1.0, 0.0]]);
        // article with a chunk but no embedding
        conn.execute(
            "INSERT INTO article (title, url, filename, is_draft, body) VALUES ('b', '', 'b.md', false, '')",
            (),
        )
        .unwrap();
        let b = conn.last_insert_rowid() as usize;
        conn.execute(
            "INSERT INTO topic_embedding (article_id, chunk_id, text) VALUES (?1, 0, 'text')",
            [b],
        )
        .unwrap();

        assert_eq!(calc(&mut conn).unwrap(), 0);
    }

    #[test]
    fn mean_over_chunks_uses_all_pairs() {
        let mut conn = db::open_in_memory();
        let a = seed_article(&conn, "a.md", &[vec![1.0, 0.0], vec![0.0, 1.0]]);
        let b = seed_article(&conn, "b.md", &[vec![1.0, 0.0]]);
        calc(&mut conn).unwrap();

        let neighbours = query(&conn, a, 5).unwrap();
        assert_eq!(neighbours.len(), 1);
        assert_eq!(neighbours[0].0, b);
        // chunk pair similarities are 1.0 and 0.0, mean 0.5
        assert!((neighbours[0].2 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn write_related_fills_front_matter_once() {
        let conn = db::open_in_memory();
        let dir = tempfile::tempdir().unwrap();

        let mut paths = Vec::new();
        for name in ["a.md", "b.md"] {
            let p = dir.path().join(name);
            fs::write(&p, format!("---\ntitle: {name}\n---\nBody of {name}.\n")).unwrap();
            conn.execute(
                "INSERT INTO article (title, url, filename, is_draft, body) VALUES (?1, '', ?2, false, '')",
                (name, p.to_string_lossy()),
            )
            .unwrap();
            paths.push(p);
        }
        conn.execute(
            "INSERT INTO article_similarity (article_a, article_b, similarity) VALUES (1, 2, 0.9)",
            (),
        )
        .unwrap();

        let written = write_related(&conn, false, false).unwrap();
        assert_eq!(written, 2);

        let a = fs::read_to_string(&paths[0]).unwrap();
        let doc = crate::front_matter::Document::parse(&a);
        assert_eq!(doc.front_matter.related, vec!["b.md"]);
        assert_eq!(doc.body, "Body of a.md.");

        // A second pass skips files that already have a related list
        assert_eq!(write_related(&conn, false, false).unwrap(), 0);
    }

    #[test]
    fn write_related_skips_weak_matches() {
        let conn = db::open_in_memory();
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.md", "b.md"] {
            let p = dir.path().join(name);
            fs::write(&p, format!("---\ntitle: {name}\n---\nBody.\n")).unwrap();
            conn.execute(
                "INSERT INTO article (title, url, filename, is_draft, body) VALUES (?1, '', ?2, false, '')",
                (name, p.to_string_lossy()),
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO article_similarity (article_a, article_b, similarity) VALUES (1, 2, 0.2)",
            (),
        )
        .unwrap();
        assert_eq!(write_related(&conn, false, false).unwrap(), 0);
    }
}

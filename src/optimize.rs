// MIT License
// Copyright (c) 2025 Copydesk Authors

//! The unified optimization service: title candidates, SEO description,
//! tags and FAQ entries for an article, all generated in a single model
//! call instead of one call per field.

use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::io;
use std::io::Write;
use std::path;

use anyhow::Context;

use crate::db;
use crate::front_matter::{self, FrontMatter};
use crate::worklist;
use crate::{ModelChoice, Prompts};

pub const MAX_TITLES: usize = 3;
pub const MAX_TAGS: usize = 8;
pub const MAX_FAQS: usize = 5;
/// Search engines clip description snippets around here.
pub const DESCRIPTION_TARGET_CHARS: usize = 160;

const OPTIMIZE_PROMPTS: Prompts = Prompts {
    system: "You are an SEO editor for a publishing platform. \
             Respond only with a JSON object, no prose and no code fence.",
    user: r#"For the article body below, produce everything at once as JSON of this shape:
{"titles": ["up to three headline candidates"], "seo_description": "search snippet, under 160 characters", "tags": ["up to eight lowercase topic tags"], "faqs": [{"question": "a question readers would search for", "answer": "a two or three sentence answer"}]}"#,
};

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Faq {
    pub question: String,
    pub answer: String,
}

/// What one model call comes back with, after normalization.
#[derive(Debug, Default, serde::Deserialize)]
pub struct OptimizationBundle {
    #[serde(default)]
    pub titles: Vec<String>,
    #[serde(default)]
    pub seo_description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub faqs: Vec<Faq>,
}

impl OptimizationBundle {
    fn normalize(mut self) -> OptimizationBundle {
        self.titles = self
            .titles
            .iter()
            .map(|t| front_matter::truncate_title(t))
            .filter(|t| !t.is_empty())
            .take(MAX_TITLES)
            .collect();

        self.seo_description = self
            .seo_description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let mut seen = Vec::new();
        for tag in &self.tags {
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() && !seen.contains(&tag) {
                seen.push(tag);
            }
        }
        seen.truncate(MAX_TAGS);
        self.tags = seen;

        self.faqs = self
            .faqs
            .into_iter()
            .map(|f| Faq {
                question: f.question.trim().to_string(),
                answer: f.answer.trim().to_string(),
            })
            .filter(|f| !f.question.is_empty() && !f.answer.is_empty())
            .take(MAX_FAQS)
            .collect();
        self
    }
}

/// One chat call, one bundle.
pub fn generate(model: ModelChoice, body: &str) -> anyhow::Result<OptimizationBundle> {
    let reply = crate::chat(model, body, OPTIMIZE_PROMPTS)?;
    parse_bundle(&reply)
}

fn parse_bundle(reply: &str) -> anyhow::Result<OptimizationBundle> {
    let json = crate::strip_code_fence(reply);
    let bundle: OptimizationBundle =
        serde_json::from_str(json).context("optimization reply is not the expected JSON")?;
    Ok(bundle.normalize())
}

/// Store a bundle, replacing the previous suggestions for this article.
pub fn persist_bundle(
    conn: &mut rusqlite::Connection,
    article_id: usize,
    bundle: &OptimizationBundle,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now();
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM seo_suggestion WHERE article_id = ?1", [article_id])?;
    tx.execute("DELETE FROM faq WHERE article_id = ?1", [article_id])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO seo_suggestion (article_id, kind, content, created) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for title in &bundle.titles {
            stmt.execute((article_id, "title", title, now))?;
        }
        if let Some(desc) = &bundle.seo_description {
            stmt.execute((article_id, "description", desc, now))?;
        }
        for tag in &bundle.tags {
            stmt.execute((article_id, "tag", tag, now))?;
        }
    }
    {
        let mut stmt = tx.prepare(
            "INSERT INTO faq (article_id, question, answer, created) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for faq in &bundle.faqs {
            stmt.execute((article_id, &faq.question, &faq.answer, now))?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Merge the description and tags into the article file's front matter.
/// Fields the author already set are left alone. Returns false when there
/// was nothing to add.
pub fn write_front_matter(
    filepath: &path::Path,
    bundle: &OptimizationBundle,
    is_backup: bool,
) -> anyhow::Result<bool> {
    let contents =
        fs::read_to_string(filepath).with_context(|| format!("{}", filepath.display()))?;

    let (mut fm, body) = match FrontMatter::select(&contents) {
        Some(fenced) => {
            let fm: HashMap<String, serde_yaml::Value> =
                serde_yaml::from_str(&fenced.join("\n"))
                    .with_context(|| format!("{}", filepath.display()))?;
            let body: String = contents
                .lines()
                .skip(fenced.len() + 2) // Add the two dashes lines we must also skip
                .collect::<Vec<&str>>()
                .join("\n");
            (fm, body)
        }
        None => {
            // A plain file gains front matter, title taken the fallback way
            let doc = front_matter::Document::parse(&contents);
            let mut fm = HashMap::new();
            fm.insert(
                "title".to_string(),
                serde_yaml::Value::String(doc.front_matter.title),
            );
            (fm, doc.body)
        }
    };

    let mut added = false;
    if let Some(desc) = &bundle.seo_description {
        if !fm.contains_key("description") {
            fm.insert(
                "description".to_string(),
                serde_yaml::Value::String(desc.clone()),
            );
            added = true;
        }
    }
    if !bundle.tags.is_empty() && !fm.contains_key("tags") {
        fm.insert(
            "tags".to_string(),
            serde_yaml::Value::Sequence(
                bundle
                    .tags
                    .iter()
                    .map(|t| serde_yaml::Value::String(t.clone()))
                    .collect(),
            ),
        );
        added = true;
    }
    if !added {
        return Ok(false);
    }

    let y = serde_yaml::to_string(&fm)?;
    let mut writer: Box<dyn io::Write> = if is_backup {
        let mut bak = filepath.to_path_buf();
        bak.set_extension("BAK");
        fs::rename(filepath, bak)?;
        Box::new(File::create_new(filepath)?)
    } else {
        Box::new(File::create(filepath)?)
    };
    write!(writer, "{}", front_matter::render(&y, &body))?;
    Ok(true)
}

pub fn run(
    db_path: &str,
    model: ModelChoice,
    article: Option<usize>,
    write_back: bool,
    is_backup: bool,
) -> anyhow::Result<()> {
    let mut conn = db::open(db_path)?;
    let ids = match article {
        Some(id) => vec![id],
        None => worklist::with_status(&conn, worklist::Status::Proofread)?,
    };
    if ids.is_empty() {
        println!("No proofread articles waiting for optimization");
        return Ok(());
    }
    println!("Optimizing {} articles", ids.len());

    let mut done = 0;
    for id in ids {
        let (title, body, filename): (String, String, String) = conn
            .query_row(
                "SELECT title, body, filename FROM article WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .with_context(|| format!("article {id}"))?;

        let bundle = match generate(model, &body) {
            Ok(bundle) => bundle,
            Err(err) => {
                // No generation fallback here, unlike proofreading
                eprintln!("{title}: optimization failed: {err:#}");
                continue;
            }
        };
        persist_bundle(&mut conn, id, &bundle)?;

        println!("{title}");
        for t in &bundle.titles {
            println!("  title: {t}");
        }
        if let Some(desc) = &bundle.seo_description {
            let over = desc.chars().count() > DESCRIPTION_TARGET_CHARS;
            let tail = if over { " (over the 160 char target)" } else { "" };
            println!("  description: {desc}{tail}");
        }
        if !bundle.tags.is_empty() {
            println!("  tags: {}", bundle.tags.join(", "));
        }
        println!("  faqs: {}", bundle.faqs.len());

        if write_back && write_front_matter(path::Path::new(&filename), &bundle, is_backup)? {
            println!("  front matter updated: {filename}");
        }

        // Blocked articles stay blocked until re-proofread clears them
        if worklist::get_status(&conn, id)? != Some(worklist::Status::Blocked) {
            worklist::set_status(&conn, id, worklist::Status::Optimized)?;
        }
        done += 1;
    }
    println!("\nOptimized {done} articles");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_fenced_bundle() {
        let reply = "```json\n{\"titles\": [\"One\"], \"seo_description\": \"Desc.\", \"tags\": [\"Rust\", \"rust\", \"cli\"], \"faqs\": [{\"question\": \"Q?\", \"answer\": \"A.\"}]}\n```";
        let bundle = parse_bundle(reply).unwrap();
        assert_eq!(bundle.titles, vec!["One"]);
        assert_eq!(bundle.seo_description.as_deref(), Some("Desc."));
        // tags are lowercased and deduplicated
        assert_eq!(bundle.tags, vec!["rust", "cli"]);
        assert_eq!(bundle.faqs.len(), 1);
    }

    #[test]
    fn normalization_drops_empties_and_caps_lists() {
        let reply = serde_json::json!({
            "titles": ["", "  ", "Kept", "Two", "Three", "Four"],
            "seo_description": "   ",
            "tags": (0..20).map(|i| format!("t{i}")).collect::<Vec<_>>(),
            "faqs": [
                {"question": "Q1?", "answer": ""},
                {"question": "Q2?", "answer": "A2"},
            ],
        })
        .to_string();
        let bundle = parse_bundle(&reply).unwrap();
        assert_eq!(bundle.titles, vec!["Kept", "Two", "Three"]);
        assert!(bundle.seo_description.is_none());
        assert_eq!(bundle.tags.len(), MAX_TAGS);
        assert_eq!(bundle.faqs.len(), 1);
        assert_eq!(bundle.faqs[0].question, "Q2?");
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let bundle = parse_bundle("{}").unwrap();
        assert!(bundle.titles.is_empty());
        assert!(bundle.seo_description.is_none());
        assert!(bundle.tags.is_empty());
        assert!(bundle.faqs.is_empty());
    }

    #[test]
    fn prose_reply_is_an_error() {
        assert!(parse_bundle("Sure! Here are some titles you could use").is_err());
    }

    #[test]
    fn long_title_candidates_are_truncated() {
        let reply = serde_json::json!({"titles": ["y".repeat(800)]}).to_string();
        let bundle = parse_bundle(&reply).unwrap();
        assert_eq!(bundle.titles[0].chars().count(), 500);
    }

    #[test]
    fn persist_replaces_previous_suggestions() {
        let mut conn = db::open_in_memory();
        conn.execute(
            "INSERT INTO article (title, url, filename, is_draft, body) VALUES ('t', '', 'a.md', false, '')",
            (),
        )
        .unwrap();
        let id = conn.last_insert_rowid() as usize;

        let first = OptimizationBundle {
            titles: vec!["Old title".to_string()],
            seo_description: Some("Old desc".to_string()),
            tags: vec!["old".to_string()],
            faqs: vec![Faq {
                question: "Old?".to_string(),
                answer: "Yes.".to_string(),
            }],
        };
        persist_bundle(&mut conn, id, &first).unwrap();

        let second = OptimizationBundle {
            titles: vec!["New title".to_string()],
            seo_description: None,
            tags: vec![],
            faqs: vec![],
        };
        persist_bundle(&mut conn, id, &second).unwrap();

        let suggestions: usize = conn
            .query_row("SELECT COUNT(*) FROM seo_suggestion", (), |r| r.get(0))
            .unwrap();
        let faqs: usize = conn
            .query_row("SELECT COUNT(*) FROM faq", (), |r| r.get(0))
            .unwrap();
        assert_eq!(suggestions, 1, "only the new title row should remain");
        assert_eq!(faqs, 0);
        let content: String = conn
            .query_row("SELECT content FROM seo_suggestion", (), |r| r.get(0))
            .unwrap();
        assert_eq!(content, "New title");
    }

    #[test]
    fn write_back_merges_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.md");
        fs::write(&p, "---\ntitle: Keep\ndescription: Mine\n---\nBody.\n").unwrap();

        let bundle = OptimizationBundle {
            titles: vec![],
            seo_description: Some("Generated".to_string()),
            tags: vec!["rust".to_string()],
            faqs: vec![],
        };
        let changed = write_front_matter(&p, &bundle, true).unwrap();
        assert!(changed, "tags were missing so the file should change");

        let after = fs::read_to_string(&p).unwrap();
        let doc = front_matter::Document::parse(&after);
        assert_eq!(doc.front_matter.title, "Keep");
        assert_eq!(
            doc.front_matter.description.as_deref(),
            Some("Mine"),
            "an author-set description must not be overwritten"
        );
        assert_eq!(doc.front_matter.tags, vec!["rust"]);
        assert_eq!(doc.body, "Body.");
        assert!(dir.path().join("a.BAK").exists());
    }

    #[test]
    fn write_back_with_nothing_to_add_leaves_the_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.md");
        let original = "---\ntitle: T\ndescription: D\ntags:\n- x\n---\nBody.\n";
        fs::write(&p, original).unwrap();

        let bundle = OptimizationBundle {
            titles: vec![],
            seo_description: Some("ignored".to_string()),
            tags: vec!["ignored".to_string()],
            faqs: vec![],
        };
        let changed = write_front_matter(&p, &bundle, true).unwrap();
        assert!(!changed);
        assert_eq!(fs::read_to_string(&p).unwrap(), original);
        assert!(!dir.path().join("a.BAK").exists());
    }

    #[test]
    fn plain_file_gains_front_matter() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("plain.md");
        fs::write(&p, "A bare note\nWith some body text.\n").unwrap();

        let bundle = OptimizationBundle {
            titles: vec![],
            seo_description: Some("Now described".to_string()),
            tags: vec![],
            faqs: vec![],
        };
        assert!(write_front_matter(&p, &bundle, false).unwrap());
        let doc = front_matter::Document::parse(&fs::read_to_string(&p).unwrap());
        assert_eq!(doc.front_matter.title, "A bare note");
        assert_eq!(doc.front_matter.description.as_deref(), Some("Now described"));
        assert_eq!(doc.body, "With some body text.");
    }
}

// MIT License
// Copyright (c) 2025 Copydesk Authors

//! The lightweight proofreading service. A chat model reviews the article
//! body and returns a JSON issue report; when the model is unavailable or
//! its reply does not parse, the built-in rule engine takes over so every
//! article always gets a report.

use std::collections::HashSet;

use crate::worklist;
use crate::{ModelChoice, Prompts};

pub mod rules;

const PROOFREAD_PROMPTS: Prompts = Prompts {
    system: "You are a copy editor for a publishing platform. \
             Respond only with a JSON object, no prose and no code fence.",
    user: r#"Proofread the article body below. Reply with JSON of this shape:
{"issues": [{"rule": "short-code", "severity": "info|warning|error", "message": "what is wrong", "quote": "the offending text", "suggestion": "optional fix", "blocks_publish": false}], "suggested_content": "full corrected body, only when changes are worth it"}
Mark an issue blocks_publish only when publishing it as-is would embarrass the author."#,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

}

impl Default for Severity {
    fn default() -> Self {
        Severity::Warning
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProofreadingIssue {
    pub rule: String,
    #[serde(default)]
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub quote: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub blocks_publish: bool,
}

// The JSON shape we ask the model for
#[derive(Debug, Default, serde::Deserialize)]
struct AiReport {
    #[serde(default)]
    issues: Vec<ProofreadingIssue>,
    #[serde(default)]
    suggested_content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Ai,
    Rules,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Ai => "ai",
            Engine::Rules => "rules",
        }
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct ProofreadingStats {
    pub chars_scanned: usize,
    pub total: usize,
    pub info: usize,
    pub warnings: usize,
    pub errors: usize,
    pub blocking: usize,
}

#[derive(Debug)]
pub struct Report {
    pub issues: Vec<ProofreadingIssue>,
    pub suggested_content: Option<String>,
    pub engine: Engine,
    pub stats: ProofreadingStats,
}

impl Report {
    pub fn blocking_issues(&self) -> Vec<&ProofreadingIssue> {
        self.issues.iter().filter(|i| i.blocks_publish).collect()
    }
}

fn stats_for(body: &str, issues: &[ProofreadingIssue]) -> ProofreadingStats {
    let mut stats = ProofreadingStats {
        chars_scanned: body.chars().count(),
        total: issues.len(),
        ..ProofreadingStats::default()
    };
    for issue in issues {
        match issue.severity {
            Severity::Info => stats.info += 1,
            Severity::Warning => stats.warnings += 1,
            Severity::Error => stats.errors += 1,
        }
        if issue.blocks_publish {
            stats.blocking += 1;
        }
    }
    stats
}

/// Rule-engine review. Always succeeds, which is what makes it a usable
/// fallback for the model path.
pub fn review(body: &str, suppressed: &HashSet<String>) -> Report {
    let issues = rules::scan(body, suppressed);
    let stats = stats_for(body, &issues);
    Report {
        issues,
        suggested_content: None,
        engine: Engine::Rules,
        stats,
    }
}

/// Model review with the rule engine as a guaranteed fallback.
pub fn review_with_model(
    model: ModelChoice,
    body: &str,
    suppressed: &HashSet<String>,
) -> Report {
    match crate::chat(model, body, PROOFREAD_PROMPTS).and_then(|reply| parse_report(&reply)) {
        Ok(ai) => {
            let issues: Vec<ProofreadingIssue> = ai
                .issues
                .into_iter()
                .filter(|i| !suppressed.contains(&i.rule))
                .collect();
            let stats = stats_for(body, &issues);
            Report {
                issues,
                suggested_content: ai.suggested_content.filter(|s| !s.trim().is_empty()),
                engine: Engine::Ai,
                stats,
            }
        }
        Err(err) => {
            tracing::warn!(%err, "model proofread failed, using rule engine");
            review(body, suppressed)
        }
    }
}

fn parse_report(reply: &str) -> anyhow::Result<AiReport> {
    let json = crate::strip_code_fence(reply);
    let report = serde_json::from_str(json)?;
    Ok(report)
}

/// Store a report, replacing whatever the previous run produced for this
/// article. Decisions made against the replaced issues go with them.
pub fn persist_report(
    conn: &mut rusqlite::Connection,
    article_id: usize,
    report: &Report,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now();
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM decision WHERE issue_id IN (SELECT id FROM issue WHERE article_id = ?1)",
        [article_id],
    )?;
    tx.execute("DELETE FROM issue WHERE article_id = ?1", [article_id])?;
    {
        let mut stmt = tx.prepare(
            r#"INSERT INTO issue
               (article_id, rule, severity, message, quote, suggestion, blocks_publish, engine, created)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        )?;
        for issue in &report.issues {
            stmt.execute((
                article_id,
                &issue.rule,
                issue.severity.as_str(),
                &issue.message,
                &issue.quote,
                &issue.suggestion,
                issue.blocks_publish,
                report.engine.as_str(),
                now,
            ))?;
        }
    }
    tx.commit()?;

    let status = if report.stats.blocking > 0 {
        worklist::Status::Blocked
    } else {
        worklist::Status::Proofread
    };
    worklist::set_status(conn, article_id, status)?;
    Ok(())
}

pub fn run(db_path: &str, model: ModelChoice, article: Option<usize>) -> anyhow::Result<()> {
    let mut conn = crate::db::open(db_path)?;
    let ids = match article {
        Some(id) => vec![id],
        None => worklist::with_status(&conn, worklist::Status::Pending)?,
    };
    if ids.is_empty() {
        println!("No pending articles, ingest a directory first");
        return Ok(());
    }
    let suppressed = crate::feedback::suppressed_rules(&conn)?;
    println!("Proofreading {} articles", ids.len());

    for id in ids {
        let (title, body): (String, String) = conn
            .query_row(
                "SELECT title, body FROM article WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| anyhow::anyhow!("no article with id {id}"))?;

        let report = review_with_model(model, &body, &suppressed);
        persist_report(&mut conn, id, &report)?;
        print_report(id, &title, &report);
    }
    Ok(())
}

fn print_report(article_id: usize, title: &str, report: &Report) {
    let s = &report.stats;
    println!(
        "\n{title} (article {article_id}, engine {}): {} issues, {} blocking",
        report.engine.as_str(),
        s.total,
        s.blocking
    );
    for issue in &report.issues {
        let flag = if issue.blocks_publish { " BLOCKS" } else { "" };
        println!(
            "  [{}{flag}] {}: {}",
            issue.severity.as_str(),
            issue.rule,
            issue.message
        );
        if !issue.quote.is_empty() {
            println!("      \"{}\"", issue.quote);
        }
        if let Some(suggestion) = &issue.suggestion {
            println!("      try: {suggestion}");
        }
    }
    println!(
        "  stats: {} chars scanned, {} info / {} warning / {} error",
        s.chars_scanned, s.info, s.warnings, s.errors
    );
    if let Some(content) = &report.suggested_content {
        println!("  suggested rewrite:\n{content}");
    }
}

// MIT License
// Copyright (c) 2025 Copydesk Authors

//! Reviewer decisions on proofreading issues, and the tuning pass that
//! suppresses rules reviewers keep rejecting.

use std::collections::HashSet;
use std::fmt;
use std::str;

use rusqlite::OptionalExtension;

pub const DEFAULT_MIN_DECISIONS: usize = 5;
pub const DEFAULT_MAX_REJECT_RATE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Verdict {
    Accept,
    Reject,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accept => "accept",
            Verdict::Reject => "reject",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl str::FromStr for Verdict {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(Verdict::Accept),
            "reject" => Ok(Verdict::Reject),
            other => Err(anyhow::anyhow!("unknown verdict {other:?}")),
        }
    }
}

/// Record one reviewer verdict for an issue. A later verdict replaces the
/// earlier one, so each issue carries at most one decision.
pub fn record_decision(
    conn: &rusqlite::Connection,
    issue_id: usize,
    verdict: Verdict,
    note: Option<&str>,
) -> anyhow::Result<()> {
    let exists: Option<usize> = conn
        .query_row("SELECT id FROM issue WHERE id = ?1", [issue_id], |row| {
            row.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Err(anyhow::anyhow!("no issue with id {issue_id}"));
    }
    conn.execute(
        r#"INSERT INTO decision (issue_id, verdict, note, created)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT(issue_id) DO UPDATE SET
               verdict = excluded.verdict, note = excluded.note, created = excluded.created"#,
        (issue_id, verdict.as_str(), note, chrono::Utc::now()),
    )?;
    Ok(())
}

/// Per-rule aggregate of reviewer decisions.
#[derive(Debug)]
pub struct RuleStats {
    pub rule: String,
    pub decided: usize,
    pub accepted: usize,
    pub rejected: usize,
}

impl RuleStats {
    pub fn reject_rate(&self) -> f64 {
        if self.decided == 0 {
            0.0
        } else {
            self.rejected as f64 / self.decided as f64
        }
    }
}

pub fn rule_stats(conn: &rusqlite::Connection) -> anyhow::Result<Vec<RuleStats>> {
    let mut stmt = conn.prepare(
        r#"SELECT i.rule,
                  COUNT(d.id),
                  SUM(CASE WHEN d.verdict = 'accept' THEN 1 ELSE 0 END),
                  SUM(CASE WHEN d.verdict = 'reject' THEN 1 ELSE 0 END)
           FROM issue i
           JOIN decision d ON d.issue_id = i.id
           GROUP BY i.rule
           ORDER BY i.rule"#,
    )?;
    let stats = stmt
        .query_map((), |row| {
            Ok(RuleStats {
                rule: row.get(0)?,
                decided: row.get(1)?,
                accepted: row.get(2)?,
                rejected: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(stats)
}

/// Re-derive the suppression table from the decision record.
///
/// Rules at or past the reject threshold (with enough decisions to judge)
/// are suppressed; rules that have dropped back under it are released.
/// Returns (suppressed, released) rule codes.
pub fn apply_tuning(
    conn: &mut rusqlite::Connection,
    min_decisions: usize,
    max_reject_rate: f64,
) -> anyhow::Result<(Vec<String>, Vec<String>)> {
    let stats = rule_stats(conn)?;
    let now = chrono::Utc::now();
    let tx = conn.transaction()?;

    let mut suppressed = Vec::new();
    let mut kept = HashSet::new();
    for s in &stats {
        if s.decided >= min_decisions && s.reject_rate() >= max_reject_rate {
            tx.execute(
                r#"INSERT INTO suppressed_rule (rule, reject_rate, decided_at)
                   VALUES (?1, ?2, ?3)
                   ON CONFLICT(rule) DO UPDATE SET
                       reject_rate = excluded.reject_rate, decided_at = excluded.decided_at"#,
                (&s.rule, s.reject_rate(), now),
            )?;
            kept.insert(s.rule.clone());
            suppressed.push(s.rule.clone());
        }
    }

    let mut released = Vec::new();
    {
        let mut stmt = tx.prepare("SELECT rule FROM suppressed_rule")?;
        let existing = stmt
            .query_map((), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for rule in existing {
            if !kept.contains(&rule) {
                released.push(rule);
            }
        }
    }
    for rule in &released {
        tx.execute("DELETE FROM suppressed_rule WHERE rule = ?1", [rule])?;
    }

    tx.commit()?;
    tracing::debug!(?suppressed, ?released, "tuning applied");
    Ok((suppressed, released))
}

pub fn suppressed_rules(conn: &rusqlite::Connection) -> anyhow::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT rule FROM suppressed_rule")?;
    let rules = stmt
        .query_map((), |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(rules)
}

pub fn run_decide(
    db_path: &str,
    issue_id: usize,
    verdict: Verdict,
    note: Option<&str>,
) -> anyhow::Result<()> {
    let conn = crate::db::open(db_path)?;
    record_decision(&conn, issue_id, verdict, note)?;
    println!("Recorded {verdict} for issue {issue_id}");
    Ok(())
}

pub fn run_tune(
    db_path: &str,
    min_decisions: usize,
    max_reject_rate: f64,
    apply: bool,
) -> anyhow::Result<()> {
    let mut conn = crate::db::open(db_path)?;
    let stats = rule_stats(&conn)?;
    if stats.is_empty() {
        println!("No decisions recorded yet");
        return Ok(());
    }
    println!("{:<24} {:>8} {:>8} {:>8} {:>8}", "rule", "decided", "accept", "reject", "rate");
    for s in &stats {
        let marker = if s.decided >= min_decisions && s.reject_rate() >= max_reject_rate {
            "  <- suppress"
        } else {
            ""
        };
        println!(
            "{:<24} {:>8} {:>8} {:>8} {:>8.2}{marker}",
            s.rule,
            s.decided,
            s.accepted,
            s.rejected,
            s.reject_rate()
        );
    }
    if !apply {
        println!("\nRe-run with --apply to update the suppression table");
        return Ok(());
    }
    let (suppressed, released) = apply_tuning(&mut conn, min_decisions, max_reject_rate)?;
    for rule in &suppressed {
        println!("suppressed: {rule}");
    }
    for rule in &released {
        println!("released: {rule}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seed_issue(conn: &rusqlite::Connection, rule: &str) -> usize {
        conn.execute(
            "INSERT INTO article (title, url, filename, is_draft, body) VALUES ('t', '', hex(randomblob(4)), false, '')",
            (),
        )
        .unwrap();
        let article_id = conn.last_insert_rowid();
        conn.execute(
            r#"INSERT INTO issue (article_id, rule, severity, message, quote, blocks_publish, engine, created)
               VALUES (?1, ?2, 'warning', 'm', 'q', false, 'rules', ?3)"#,
            (article_id, rule, chrono::Utc::now()),
        )
        .unwrap();
        conn.last_insert_rowid() as usize
    }

    #[test]
    fn second_verdict_replaces_first() {
        let conn = db::open_in_memory();
        let issue = seed_issue(&conn, "double-space");
        record_decision(&conn, issue, Verdict::Accept, None).unwrap();
        record_decision(&conn, issue, Verdict::Reject, Some("too noisy")).unwrap();

        let count: usize = conn
            .query_row("SELECT COUNT(*) FROM decision", (), |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let verdict: String = conn
            .query_row("SELECT verdict FROM decision", (), |r| r.get(0))
            .unwrap();
        assert_eq!(verdict, "reject");
    }

    #[test]
    fn decision_requires_existing_issue() {
        let conn = db::open_in_memory();
        assert!(record_decision(&conn, 999, Verdict::Accept, None).is_err());
    }

    #[test]
    fn stats_aggregate_per_rule() {
        let conn = db::open_in_memory();
        for verdict in [Verdict::Accept, Verdict::Reject, Verdict::Reject] {
            let issue = seed_issue(&conn, "long-sentence");
            record_decision(&conn, issue, verdict, None).unwrap();
        }
        let stats = rule_stats(&conn).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].rule, "long-sentence");
        assert_eq!(stats[0].decided, 3);
        assert_eq!(stats[0].accepted, 1);
        assert_eq!(stats[0].rejected, 2);
        assert!((stats[0].reject_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn tuning_suppresses_and_releases() {
        let mut conn = db::open_in_memory();
        // 5 rejections for double-space, 1 accept for repeated-word
        for _ in 0..5 {
            let issue = seed_issue(&conn, "double-space");
            record_decision(&conn, issue, Verdict::Reject, None).unwrap();
        }
        let kept = seed_issue(&conn, "repeated-word");
        record_decision(&conn, kept, Verdict::Accept, None).unwrap();

        let (suppressed, released) = apply_tuning(&mut conn, 5, 0.8).unwrap();
        assert_eq!(suppressed, vec!["double-space".to_string()]);
        assert!(released.is_empty());
        assert!(suppressed_rules(&conn).unwrap().contains("double-space"));

        // Flip the double-space decisions to accepts and re-tune
        conn.execute("UPDATE decision SET verdict = 'accept'", ()).unwrap();
        let (suppressed, released) = apply_tuning(&mut conn, 5, 0.8).unwrap();
        assert!(suppressed.is_empty());
        assert_eq!(released, vec!["double-space".to_string()]);
        assert!(suppressed_rules(&conn).unwrap().is_empty());
    }

    #[test]
    fn too_few_decisions_never_suppress() {
        let mut conn = db::open_in_memory();
        for _ in 0..3 {
            let issue = seed_issue(&conn, "todo-marker");
            record_decision(&conn, issue, Verdict::Reject, None).unwrap();
        }
        let (suppressed, _) = apply_tuning(&mut conn, 5, 0.8).unwrap();
        assert!(suppressed.is_empty());
    }
}

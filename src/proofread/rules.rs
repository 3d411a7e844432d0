// MIT License
// Copyright (c) 2025 Copydesk Authors

//! Built-in text checks. No configuration and no network, which is what
//! lets the proofreading service promise a report for every article.

use std::collections::HashSet;

use super::{ProofreadingIssue, Severity};

const LONG_SENTENCE_CHARS: usize = 220;
const LONG_PARAGRAPH_CHARS: usize = 1200;
const QUOTE_CHARS: usize = 120;

struct RuleMeta {
    code: &'static str,
    severity: Severity,
    blocks_publish: bool,
}

const RULES: [RuleMeta; 9] = [
    RuleMeta {
        code: "repeated-word",
        severity: Severity::Warning,
        blocks_publish: false,
    },
    RuleMeta {
        code: "double-space",
        severity: Severity::Info,
        blocks_publish: false,
    },
    RuleMeta {
        code: "trailing-whitespace",
        severity: Severity::Info,
        blocks_publish: false,
    },
    RuleMeta {
        code: "long-sentence",
        severity: Severity::Warning,
        blocks_publish: false,
    },
    RuleMeta {
        code: "long-paragraph",
        severity: Severity::Info,
        blocks_publish: false,
    },
    RuleMeta {
        code: "unclosed-pair",
        severity: Severity::Error,
        blocks_publish: true,
    },
    RuleMeta {
        code: "todo-marker",
        severity: Severity::Error,
        blocks_publish: true,
    },
    RuleMeta {
        code: "placeholder-text",
        severity: Severity::Error,
        blocks_publish: true,
    },
    RuleMeta {
        code: "empty-link",
        severity: Severity::Warning,
        blocks_publish: false,
    },
];

fn make(
    code: &'static str,
    message: String,
    quote: &str,
    suggestion: Option<String>,
) -> ProofreadingIssue {
    let meta = RULES
        .iter()
        .find(|m| m.code == code)
        .expect("unknown rule code");
    ProofreadingIssue {
        rule: code.to_string(),
        severity: meta.severity,
        message,
        quote: clip(quote),
        suggestion,
        blocks_publish: meta.blocks_publish,
    }
}

fn clip(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() <= QUOTE_CHARS {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(QUOTE_CHARS).collect();
        t.push('…');
        t
    }
}

fn snippet(body: &str, pos: usize) -> String {
    body[pos..].chars().take(60).collect()
}

type Found = Vec<(usize, ProofreadingIssue)>;

/// Scan a body, returning issues ordered by position. Suppressed rule codes
/// emit nothing. Fenced code blocks are left alone.
pub fn scan(body: &str, suppressed: &HashSet<String>) -> Vec<ProofreadingIssue> {
    let mut found: Found = Vec::new();

    const OPENS: [char; 3] = ['(', '[', '{'];
    const CLOSES: [char; 3] = [')', ']', '}'];
    let mut open_stacks: [Vec<usize>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    let mut stray_close: [Option<usize>; 3] = [None, None, None];

    let mut offset = 0usize;
    let mut in_fence = false;
    let mut fence_lines = 0usize;
    let mut last_fence_pos = 0usize;
    let mut para_start: Option<usize> = None;
    let mut para_end = 0usize;

    for line in body.lines() {
        let line_start = offset;
        offset += line.len() + 1;

        if line.trim_start().starts_with("```") {
            fence_lines += 1;
            last_fence_pos = line_start;
            in_fence = !in_fence;
            flush_paragraph(body, para_start.take(), para_end, &mut found);
            continue;
        }
        if in_fence {
            continue;
        }
        if line.trim().is_empty() {
            flush_paragraph(body, para_start.take(), para_end, &mut found);
            continue;
        }
        if para_start.is_none() {
            para_start = Some(line_start);
        }
        para_end = line_start + line.len();

        check_repeated_word(line, line_start, &mut found);
        check_double_space(line, line_start, &mut found);
        check_trailing_whitespace(line, line_start, &mut found);
        check_markers(line, line_start, &mut found);
        check_empty_link(line, line_start, &mut found);

        for (i, c) in line.char_indices() {
            if let Some(k) = OPENS.iter().position(|&o| o == c) {
                open_stacks[k].push(line_start + i);
            } else if let Some(k) = CLOSES.iter().position(|&cl| cl == c) {
                if open_stacks[k].pop().is_none() && stray_close[k].is_none() {
                    stray_close[k] = Some(line_start + i);
                }
            }
        }
    }
    flush_paragraph(body, para_start.take(), para_end, &mut found);

    if fence_lines % 2 == 1 {
        found.push((
            last_fence_pos,
            make(
                "unclosed-pair",
                "code fence is never closed".to_string(),
                &snippet(body, last_fence_pos),
                None,
            ),
        ));
    }
    for k in 0..OPENS.len() {
        if let Some(&pos) = open_stacks[k].first() {
            found.push((
                pos,
                make(
                    "unclosed-pair",
                    format!("unmatched opening {:?}", OPENS[k]),
                    &snippet(body, pos),
                    Some(format!("close or remove the {:?}", OPENS[k])),
                ),
            ));
        } else if let Some(pos) = stray_close[k] {
            found.push((
                pos,
                make(
                    "unclosed-pair",
                    format!("stray closing {:?}", CLOSES[k]),
                    &snippet(body, pos),
                    None,
                ),
            ));
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    found
        .into_iter()
        .map(|(_, issue)| issue)
        .filter(|issue| !suppressed.contains(&issue.rule))
        .collect()
}

fn flush_paragraph(body: &str, start: Option<usize>, end: usize, found: &mut Found) {
    let Some(start) = start else {
        return;
    };
    let para = &body[start..end];
    let chars = para.chars().count();
    if chars > LONG_PARAGRAPH_CHARS {
        found.push((
            start,
            make(
                "long-paragraph",
                format!("paragraph runs to {chars} characters"),
                para,
                Some("split it into shorter paragraphs".to_string()),
            ),
        ));
    }
    check_sentences(para, start, found);
}

fn check_sentences(para: &str, para_start: usize, found: &mut Found) {
    let mut sent_start: Option<usize> = None;
    let mut chars_in_sentence = 0usize;
    for (i, c) in para.char_indices() {
        if sent_start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            sent_start = Some(i);
            chars_in_sentence = 0;
        }
        chars_in_sentence += 1;
        if matches!(c, '.' | '!' | '?') {
            if chars_in_sentence > LONG_SENTENCE_CHARS {
                let start = sent_start.unwrap();
                found.push((
                    para_start + start,
                    make(
                        "long-sentence",
                        format!("sentence runs to {chars_in_sentence} characters"),
                        &para[start..i + 1],
                        None,
                    ),
                ));
            }
            sent_start = None;
        }
    }
    if let Some(start) = sent_start {
        if chars_in_sentence > LONG_SENTENCE_CHARS {
            found.push((
                para_start + start,
                make(
                    "long-sentence",
                    format!("sentence runs to {chars_in_sentence} characters"),
                    &para[start..],
                    None,
                ),
            ));
        }
    }
}

fn words_with_offsets(line: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in line.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                out.push((s, &line[s..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push((s, &line[s..]));
    }
    out
}

fn check_repeated_word(line: &str, line_start: usize, found: &mut Found) {
    let mut prev: Option<(usize, &str, String)> = None;
    for (pos, word) in words_with_offsets(line) {
        let norm: String = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if let Some((ppos, praw, pnorm)) = &prev {
            // A word that closes a sentence may legitimately start the next one
            let sentence_break = praw.ends_with(['.', '!', '?', ':', ';']);
            if !norm.is_empty()
                && *pnorm == norm
                && !sentence_break
                && norm.chars().all(|c| c.is_alphabetic())
            {
                found.push((
                    line_start + *ppos,
                    make(
                        "repeated-word",
                        format!("the word {norm:?} appears twice in a row"),
                        &format!("{praw} {word}"),
                        Some(format!("drop one {norm:?}")),
                    ),
                ));
            }
        }
        prev = Some((pos, word, norm));
    }
}

fn check_double_space(line: &str, line_start: usize, found: &mut Found) {
    let lead = line.len() - line.trim_start().len();
    let interior = line.trim();
    if let Some(i) = interior.find("  ") {
        found.push((
            line_start + lead + i,
            make(
                "double-space",
                "two or more spaces in a row".to_string(),
                interior,
                Some("collapse to a single space".to_string()),
            ),
        ));
    }
}

fn check_trailing_whitespace(line: &str, line_start: usize, found: &mut Found) {
    if line.ends_with(' ') || line.ends_with('\t') {
        found.push((
            line_start + line.trim_end().len(),
            make(
                "trailing-whitespace",
                "line ends with whitespace".to_string(),
                line.trim_end(),
                Some("remove the trailing whitespace".to_string()),
            ),
        ));
    }
}

fn check_markers(line: &str, line_start: usize, found: &mut Found) {
    const MARKERS: [&str; 3] = ["TODO", "FIXME", "XXX"];
    for marker in MARKERS {
        for (i, _) in line.match_indices(marker) {
            let before_ok = line[..i].chars().next_back().is_none_or(|c| !c.is_alphanumeric());
            let after_ok = line[i + marker.len()..]
                .chars()
                .next()
                .is_none_or(|c| !c.is_alphanumeric());
            if before_ok && after_ok {
                found.push((
                    line_start + i,
                    make(
                        "todo-marker",
                        format!("{marker} marker left in the body"),
                        line,
                        None,
                    ),
                ));
            }
        }
    }
    if let Some(i) = line.to_lowercase().find("lorem ipsum") {
        found.push((
            line_start + i,
            make(
                "placeholder-text",
                "placeholder text left in the body".to_string(),
                line,
                None,
            ),
        ));
    }
}

fn check_empty_link(line: &str, line_start: usize, found: &mut Found) {
    if let Some(i) = line.find("]()") {
        found.push((
            line_start + i,
            make(
                "empty-link",
                "markdown link with an empty target".to_string(),
                line,
                None,
            ),
        ));
    }
}

// MIT License
// Copyright (c) 2025 Copydesk Authors

use std::path;

use crate::article::Article;

/// Titles longer than this are cut at a character boundary.
pub const MAX_TITLE_CHARS: usize = 500;

// Metadata at the top of a markdown article
#[allow(dead_code)]
#[derive(serde::Deserialize, serde::Serialize, Debug, Default)]
pub struct FrontMatter {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub draft: bool,

    // Filled by `similar write`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
}

impl From<FrontMatter> for Article {
    fn from(fm: FrontMatter) -> Self {
        Article {
            id: 0, // we don't know yet
            title: truncate_title(&fm.title),
            url: fm.url.unwrap_or_default(),
            date: fm
                .date
                .as_deref()
                .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok()),
            filename: path::PathBuf::new(),
            is_draft: fm.draft,
            body: String::new(),
            chunks: vec![],
        }
    }
}

impl FrontMatter {
    // The raw lines between the two "---" fences, if the document opens with one.
    pub fn select(s: &str) -> Option<Vec<&str>> {
        let mut lines = s.lines();
        if lines.next()?.trim_end() != "---" {
            return None;
        }
        let fenced: Vec<&str> = lines.take_while(|line| !line.starts_with("---")).collect();
        // A file that opens a fence but never closes it has no front matter
        if s.lines().count() < fenced.len() + 2 {
            return None;
        }
        Some(fenced)
    }
}

/// A markdown article split into metadata and body.
///
/// Parsing never fails: a document without front matter, or with YAML that
/// does not deserialize, goes through the fallback path where the first
/// non-empty line becomes the title and the rest becomes the body.
#[derive(Debug)]
pub struct Document {
    pub front_matter: FrontMatter,
    pub body: String,
}

impl Document {
    pub fn parse(s: &str) -> Document {
        match Self::parse_front_matter(s) {
            Some(doc) => doc,
            None => Self::fallback(s),
        }
    }

    fn parse_front_matter(s: &str) -> Option<Document> {
        let fenced = FrontMatter::select(s)?;
        let mut fm: FrontMatter = match serde_yaml::from_str(&fenced.join("\n")) {
            Ok(fm) => fm,
            Err(err) => {
                tracing::debug!(%err, "front matter did not parse, falling back");
                return None;
            }
        };
        fm.title = truncate_title(&fm.title);
        let body: String = s
            .lines()
            .skip(fenced.len() + 2) // Add the two dashes lines we must also skip
            .collect::<Vec<&str>>()
            .join("\n");
        Some(Document {
            front_matter: fm,
            body,
        })
    }

    fn fallback(s: &str) -> Document {
        let mut lines = s.lines();
        let mut title = String::new();
        for line in lines.by_ref() {
            let line = line.trim();
            // Fence lines from broken front matter are not usable titles
            if line.is_empty() || line == "---" {
                continue;
            }
            title = truncate_title(line.trim_start_matches('#').trim());
            break;
        }
        let body = lines.collect::<Vec<&str>>().join("\n");
        Document {
            front_matter: FrontMatter {
                title,
                ..FrontMatter::default()
            },
            body: body.trim_start_matches('\n').to_string(),
        }
    }
}

pub fn truncate_title(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() <= MAX_TITLE_CHARS {
        s.to_string()
    } else {
        s.chars().take(MAX_TITLE_CHARS).collect()
    }
}

/// Re-assemble a markdown file from serialized front matter and a body.
pub fn render(yaml: &str, body: &str) -> String {
    let mut out = String::with_capacity(yaml.len() + body.len() + 8);
    out.push_str("---\n");
    out.push_str(yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("---\n");
    out.push_str(body);
    out
}

// MIT License
// Copyright (c) 2025 Copydesk Authors

use std::path;

use crate::front_matter::Document;

const CHUNK_SIZE: usize = 2000;
const MIN_CHUNK: usize = 2500;

#[derive(Debug)]
pub struct Article {
    pub id: usize,
    pub title: String,
    pub url: String,
    pub date: Option<chrono::DateTime<chrono::FixedOffset>>,
    pub filename: path::PathBuf,
    pub is_draft: bool,
    pub body: String,
    pub chunks: Vec<String>,
}

impl Article {
    /// Parse a markdown file into an article plus its embedding chunks.
    /// Front matter problems never fail the parse, see [`Document::parse`].
    pub fn parse(filepath: &path::Path, s: &str) -> Article {
        let doc = Document::parse(s);

        let header = [
            doc.front_matter.title.clone(),
            doc.front_matter.date.clone().unwrap_or_default(),
        ];

        // Gather the body into CHUNK_SIZE chunks

        let mut body = doc.body.clone();
        let mut chunks = Vec::new();
        while body.len() > MIN_CHUNK {
            let mut split_pos = CHUNK_SIZE;
            while split_pos < body.len() && body.as_bytes()[split_pos] != b' ' {
                split_pos += 1;
            }
            let rest = body.split_off(split_pos);
            let mut embed_unit = header.join("\n");
            embed_unit.push_str("\n\n");
            embed_unit.push_str(&body);
            chunks.push(embed_unit);
            body = rest;
        }

        // Each chunk carries the title and date so the embedding keeps
        // the article context

        let mut embed_unit = header.join("\n");
        embed_unit.push_str(&body);
        chunks.push(embed_unit);

        let mut article: Article = doc.front_matter.into();
        article.body = doc.body;
        article.chunks = chunks;
        article.filename = filepath.to_path_buf();
        article
    }
}

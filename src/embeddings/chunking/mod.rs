
use std::collections::VecDeque;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{Document, MetadataValue};

/// Separators tried in order, from paragraph breaks down to single characters
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Metadata key recording a chunk's position within its source document
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

/// Configuration for text splitting. Sizes are measured in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 4000,
            chunk_overlap: 200,
        }
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split `text` into chunks of at most `chunk_size` characters.
///
/// Tries paragraph breaks first, then line breaks, then spaces, and only
/// falls back to cutting between characters for runs with no separator.
/// Adjacent chunks share up to `chunk_overlap` characters of context.
#[inline]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let chunks = split_recursive(text, &SEPARATORS, config);
    debug!(
        "Split {} chars into {} chunks (size {}, overlap {})",
        char_len(text),
        chunks.len(),
        config.chunk_size,
        config.chunk_overlap
    );
    chunks
}

#[expect(clippy::string_slice, reason = "bounds come from char_indices")]
fn split_recursive(text: &str, separators: &[&str], config: &ChunkingConfig) -> Vec<String> {
    let (separator, remaining) = pick_separator(text, separators);

    let splits: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|s| !s.is_empty()).collect()
    };

    let mut chunks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for split in splits {
        if char_len(split) < config.chunk_size {
            pending.push(split);
            continue;
        }

        if !pending.is_empty() {
            chunks.extend(merge_splits(&pending, separator, config));
            pending.clear();
        }

        if remaining.is_empty() {
            let trimmed = split.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
        } else {
            chunks.extend(split_recursive(split, remaining, config));
        }
    }

    if !pending.is_empty() {
        chunks.extend(merge_splits(&pending, separator, config));
    }

    chunks
}

/// First separator present in `text`, and the finer separators after it
fn pick_separator<'a, 'b>(text: &str, separators: &'b [&'a str]) -> (&'a str, &'b [&'a str]) {
    for (i, separator) in separators.iter().enumerate() {
        if separator.is_empty() || text.contains(separator) {
            return (*separator, &separators[i + 1..]);
        }
    }
    ("", &[])
}

/// Greedily pack small splits into chunks, carrying trailing splits forward as overlap
fn merge_splits(splits: &[&str], separator: &str, config: &ChunkingConfig) -> Vec<String> {
    let separator_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0;

    for &split in splits {
        let len = char_len(split);
        let joined_len = |total: usize, current: &VecDeque<&str>| {
            total + len + if current.is_empty() { 0 } else { separator_len }
        };

        if joined_len(total, &current) > config.chunk_size && !current.is_empty() {
            push_chunk(&mut chunks, &current, separator);

            while total > config.chunk_overlap
                || (joined_len(total, &current) > config.chunk_size && total > 0)
            {
                let Some(front) = current.pop_front() else {
                    break;
                };
                total -= char_len(front) + if current.is_empty() { 0 } else { separator_len };
            }
        }

        total += len + if current.is_empty() { 0 } else { separator_len };
        current.push_back(split);
    }

    push_chunk(&mut chunks, &current, separator);
    chunks
}

fn push_chunk(chunks: &mut Vec<String>, current: &VecDeque<&str>, separator: &str) {
    let chunk = current.iter().join(separator);
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split every document, copying its metadata onto each chunk and recording `chunk_index`
#[inline]
pub fn split_documents(documents: &[Document], config: &ChunkingConfig) -> Vec<Document> {
    documents
        .iter()
        .flat_map(|document| {
            split_text(&document.content, config)
                .into_iter()
                .enumerate()
                .map(|(index, content)| {
                    let mut metadata = document.metadata.clone();
                    metadata.insert(
                        CHUNK_INDEX_KEY.to_string(),
                        MetadataValue::Integer(index as i64),
                    );
                    Document { content, metadata }
                })
        })
        .collect()
}

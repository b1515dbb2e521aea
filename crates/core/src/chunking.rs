//! Splits extracted page text into overlapping passages.
//!
//! Pages are joined and split one batch at a time, so a chunk never spans two batches.
//! Text that straddles a batch edge is cut there even when a better boundary exists a
//! few characters later; that loss of boundary quality is accepted to keep peak memory
//! proportional to one batch rather than to the whole document.

use crate::error::IngestError;
use crate::extractor::PageText;
use crate::models::Passage;
use sha2::{Digest, Sha256};
use std::ops::Range;
use tracing::debug;
use uuid::Uuid;

/// Boundary classes, strongest first. A cut lands right after the separator.
const BOUNDARIES: [&[&str]; 4] = [&["\n\n"], &["\n"], &[". ", "? ", "! "], &[" "]];

const PAGE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub pages_per_batch: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 4_000,
            overlap_chars: 400,
            pages_per_batch: 100,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        if self.pages_per_batch == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "pages_per_batch must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns char ranges of overlapping chunks over `chars`.
///
/// Hard cuts (no boundary in the window) start the next chunk exactly `overlap_chars`
/// before the cut, so boundary-free text is recoverable from the chunks.
fn split_spans(chars: &[char], config: &ChunkingConfig) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let limit = start + config.max_chars;
        if limit >= chars.len() {
            push_trimmed(&mut spans, chars, start, chars.len());
            break;
        }

        let floor = start + config.overlap_chars + 1;
        match find_boundary(chars, floor, limit) {
            Some(cut) => {
                push_trimmed(&mut spans, chars, start, cut);
                start = aligned_overlap_start(chars, cut - config.overlap_chars, cut);
            }
            None => {
                spans.push(start..limit);
                start = limit - config.overlap_chars;
            }
        }
    }

    spans
}

fn push_trimmed(spans: &mut Vec<Range<usize>>, chars: &[char], mut start: usize, mut end: usize) {
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    if start < end {
        spans.push(start..end);
    }
}

/// Latest position in `floor..=limit` that directly follows a separator of the strongest
/// boundary class present.
fn find_boundary(chars: &[char], floor: usize, limit: usize) -> Option<usize> {
    for class in BOUNDARIES {
        let best = class
            .iter()
            .filter_map(|separator| last_separator_end(chars, separator, floor, limit))
            .max();
        if best.is_some() {
            return best;
        }
    }
    None
}

fn last_separator_end(chars: &[char], separator: &str, floor: usize, limit: usize) -> Option<usize> {
    let pattern = separator.chars().collect::<Vec<_>>();
    let mut end = limit;
    while end >= floor && end >= pattern.len() {
        if chars[end - pattern.len()..end] == pattern[..] {
            return Some(end);
        }
        end -= 1;
    }
    None
}

/// Moves the overlap start forward to the next word start so overlaps do not begin
/// mid-word.
fn aligned_overlap_start(chars: &[char], base: usize, cut: usize) -> usize {
    if base == 0 || chars[base - 1].is_whitespace() {
        return base;
    }
    chars[base..cut]
        .iter()
        .position(|c| c.is_whitespace())
        .map(|offset| base + offset + 1)
        .filter(|candidate| *candidate < cut)
        .unwrap_or(base)
}

/// Splits a single text into chunk strings.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let chars = text.chars().collect::<Vec<_>>();
    split_spans(&chars, config)
        .into_iter()
        .map(|span| chars[span].iter().collect())
        .collect()
}

/// Chunks a document's pages batch by batch, appending every batch to one list.
pub fn chunk_pages(
    document_id: Uuid,
    source_name: &str,
    pages: &[PageText],
    config: &ChunkingConfig,
) -> Result<Vec<Passage>, IngestError> {
    config.validate()?;

    let mut passages = Vec::new();
    let mut cursor = 0u64;

    for (batch_no, batch) in pages.chunks(config.pages_per_batch).enumerate() {
        let mut chars = Vec::new();
        let mut page_offsets = Vec::with_capacity(batch.len());
        for (position, page) in batch.iter().enumerate() {
            if position > 0 {
                chars.extend(PAGE_SEPARATOR.chars());
            }
            page_offsets.push((chars.len(), page.number));
            chars.extend(page.text.chars());
        }

        let before = passages.len();
        for span in split_spans(&chars, config) {
            let text = chars[span.clone()].iter().collect::<String>();
            passages.push(Passage {
                passage_id: make_chunk_id(document_id, cursor, &text),
                document_id,
                chunk_index: cursor,
                page_start: page_at(&page_offsets, span.start),
                page_end: page_at(&page_offsets, span.end - 1),
                text,
            });
            cursor = cursor.saturating_add(1);
        }

        debug!(
            document_id = %document_id,
            batch = batch_no,
            pages = batch.len(),
            chunks = passages.len() - before,
            "chunked page batch"
        );
    }

    if passages.is_empty() {
        return Err(IngestError::NoExtractableText(source_name.to_string()));
    }

    Ok(passages)
}

fn page_at(page_offsets: &[(usize, u32)], position: usize) -> u32 {
    let index = page_offsets
        .partition_point(|(offset, _)| *offset <= position)
        .saturating_sub(1);
    page_offsets.get(index).map(|(_, number)| *number).unwrap_or(0)
}

fn make_chunk_id(document_id: Uuid, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

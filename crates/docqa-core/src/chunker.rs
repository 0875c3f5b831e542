use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::types::{Chunk, Document};

/// Splits documents into overlapping character windows.
///
/// Windows are counted in chars, never cross a page boundary, and receive
/// `chunk_id`s from a per-document counter in reading order. Identical input
/// and config always produce identical chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig { self.config }

    pub fn chunk(&self, doc: &Document) -> Vec<Chunk> {
        let source_path = doc.source_path.to_string_lossy().to_string();
        let mut chunks = Vec::new();
        let mut next_id = 0u32;
        for (page, page_text) in doc.pages() {
            let cleaned = clean_text(&page_text);
            if cleaned.is_empty() {
                continue;
            }
            for (start_char, end_char, text) in self.windows(&cleaned) {
                chunks.push(Chunk {
                    chunk_id: next_id,
                    doc_id: doc.doc_id.clone(),
                    source_path: source_path.clone(),
                    page,
                    token_count: count_tokens(&text),
                    text,
                    start_char,
                    end_char,
                });
                next_id += 1;
            }
        }
        chunks
    }

    pub fn chunk_all(&self, docs: &[Document]) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = docs.iter().flat_map(|d| self.chunk(d)).collect();
        tracing::info!(documents = docs.len(), chunks = chunks.len(), "chunked corpus");
        chunks
    }

    /// Trimmed windows of `text` with their char bounds; blank windows are skipped.
    fn windows(&self, text: &str) -> Vec<(usize, usize, String)> {
        let chars: Vec<char> = text.chars().collect();
        let size = self.config.chunk_size_chars;
        let step = size - self.config.overlap_chars;
        let mut out = Vec::new();
        let mut start = 0usize;
        while start < chars.len() {
            let end = (start + size).min(chars.len());
            let window = &chars[start..end];
            let lead = window.iter().take_while(|c| c.is_whitespace()).count();
            if lead < window.len() {
                let trail = window.iter().rev().take_while(|c| c.is_whitespace()).count();
                let (s, e) = (start + lead, end - trail);
                out.push((s, e, chars[s..e].iter().collect()));
            }
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }
}

/// Normalize extracted text: unify line endings, strip trailing blanks,
/// collapse space runs and keep at most one empty line between paragraphs.
pub fn clean_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(normalized.len());
    let mut blank_run = 0usize;
    for line in normalized.split('\n') {
        let collapsed = collapse_spaces(line);
        let line = collapsed.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut prev_space = false;
    for c in line.chars() {
        if c == ' ' || c == '\t' {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out
}

/// Rough token estimate: one token per 0.75 words.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn count_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count as f32 / 0.75) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_normalizes_whitespace() {
        let raw = "Title  \r\n\r\n\r\n\r\nbody\t\ttext   here  \nnext";
        assert_eq!(clean_text(raw), "Title\n\nbody text here\nnext");
    }

    #[test]
    fn count_tokens_uses_word_ratio() {
        assert_eq!(count_tokens("one two three"), 4);
        assert_eq!(count_tokens(""), 0);
    }
}

use std::path::Path;

use serde::{Deserialize, Serialize};

use docqa_core::error::{Error, Result};

/// One labeled question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalCase {
    pub id: String,
    pub question: String,
    /// Any of these appearing in retrieval counts as a hit.
    pub expected_doc_ids: Vec<String>,
    pub expect_refusal: bool,
    /// Substrings the answer must contain, compared case-insensitively.
    pub keywords: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCase {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    question: String,
    #[serde(default)]
    expected_doc_ids: Vec<String>,
    #[serde(default)]
    expect_refusal: bool,
    #[serde(default)]
    keywords: Vec<String>,
}

pub fn load_cases(path: &Path) -> Result<Vec<EvalCase>> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_cases(&text, &path.display().to_string())
}

/// Parse JSONL case text. `origin` names the source in error messages.
pub fn parse_cases(text: &str, origin: &str) -> Result<Vec<EvalCase>> {
    let mut cases = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let at = || format!("{origin}:{line_no}");
        let raw: RawCase = serde_json::from_str(line)
            .map_err(|e| Error::validation(format!("invalid case at {}: {e}", at())))?;

        let question = raw.question.trim().to_string();
        if question.is_empty() {
            return Err(Error::validation(format!("empty question at {}", at())));
        }
        if raw.expect_refusal && !raw.expected_doc_ids.is_empty() {
            return Err(Error::validation(format!(
                "case at {} expects a refusal but also lists expected_doc_ids",
                at()
            )));
        }
        let id = raw
            .id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("case_{line_no}"));
        cases.push(EvalCase {
            id,
            question,
            expected_doc_ids: raw.expected_doc_ids,
            expect_refusal: raw.expect_refusal,
            keywords: raw.keywords,
        });
    }
    tracing::debug!(origin, cases = cases.len(), "loaded eval cases");
    Ok(cases)
}

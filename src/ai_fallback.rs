//! Boundary to an external text-completion service that can turn raw page
//! text into transactions. Nothing here talks to a network; callers plug in
//! a [`CompletionClient`].

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::cells::reading_order;
use crate::error::ExtractError;
use crate::glyph::GlyphBox;
use crate::transaction::{ParsedTransaction, dedupe_transactions};

pub const SYSTEM_PROMPT: &str = "Extract bank transactions as JSON array. Fields: Date (YYYY-MM-DD), \
Description, Credit, Debit, Amount, Balance, Currency, Reference Number, Reference 1, Reference 2, \
Transaction Type, Transaction Category, Branch, Sender/Receiver Name, Source Date, Source Statement Page.";

/// Whole-request limit; larger inputs must be split by the caller.
pub const MAX_INPUT_CHARS: usize = 400_000;
pub const MAX_CHUNK_CHARS: usize = 60_000;

static FENCED_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("hardcoded fenced block regex is valid")
});
static BLANK_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("hardcoded newline run regex is valid"));
static SPACE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("hardcoded space run regex is valid"));

pub trait CompletionClient {
    fn complete(&self, system: &str, user: &str) -> Result<String, ExtractError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub pages: Vec<u32>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    pub pages: Vec<u32>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FallbackOutcome {
    pub transactions: Vec<ParsedTransaction>,
    pub failures: Vec<ChunkFailure>,
}

/// Glyph texts of a page in reading order, space-joined.
#[must_use]
pub fn page_text(glyphs: &[GlyphBox], line_tolerance: f64) -> String {
    let mut ordered = glyphs.iter().collect::<Vec<_>>();
    reading_order(&mut ordered, line_tolerance);
    ordered
        .iter()
        .map(|glyph| glyph.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trims line ends, collapses space/tab runs and squeezes blank-line runs.
#[must_use]
pub fn minify_text(text: &str) -> String {
    let lines = text
        .lines()
        .map(|line| SPACE_RUN_RE.replace_all(line.trim_end(), " ").into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_RUN_RE.replace_all(&lines, "\n\n").trim().to_string()
}

/// Groups pages `pages_per_chunk` at a time, each page prefixed with
/// `(Page N)`, capped at [`MAX_CHUNK_CHARS`].
#[must_use]
pub fn build_page_chunks(pages: &[PageText], pages_per_chunk: usize) -> Vec<TextChunk> {
    pages
        .chunks(pages_per_chunk.max(1))
        .map(|group| {
            let text = group
                .iter()
                .map(|page| format!("(Page {})\n{}", page.page, minify_text(&page.text)))
                .collect::<Vec<_>>()
                .join("\n\n");
            TextChunk {
                pages: group.iter().map(|page| page.page).collect(),
                text: text.chars().take(MAX_CHUNK_CHARS).collect(),
            }
        })
        .collect()
}

#[must_use]
pub fn user_prompt(text: &str) -> String {
    format!(
        "Parse the following bank statement text and return ONLY JSON array of transaction \
         objects (no commentary):\n\n{text}"
    )
}

/// Reads a completion as a JSON array, directly or from a fenced block.
pub fn parse_completion(content: &str) -> Result<Vec<ParsedTransaction>, ExtractError> {
    let content = content.trim();
    if let Ok(transactions) = serde_json::from_str::<Vec<ParsedTransaction>>(content) {
        return Ok(transactions);
    }
    let fenced = FENCED_JSON_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| ExtractError::AiResponse("completion did not return an array".to_string()))?;
    serde_json::from_str(fenced.as_str())
        .map_err(|err| ExtractError::AiResponse(format!("completion array is malformed: {err}")))
}

/// Sends every chunk to `client`. A failing chunk is recorded and skipped;
/// transactions from the other chunks are merged and de-duplicated.
pub fn parse_with_fallback<C: CompletionClient + ?Sized>(
    client: &C,
    pages: &[PageText],
    pages_per_chunk: usize,
) -> Result<FallbackOutcome, ExtractError> {
    let len = pages.iter().map(|page| page.text.chars().count()).sum::<usize>();
    if len > MAX_INPUT_CHARS {
        return Err(ExtractError::InputTooLarge {
            len,
            limit: MAX_INPUT_CHARS,
        });
    }

    let mut outcome = FallbackOutcome::default();
    let mut merged = Vec::new();
    for chunk in build_page_chunks(pages, pages_per_chunk) {
        let parsed = client
            .complete(SYSTEM_PROMPT, &user_prompt(&chunk.text))
            .and_then(|content| parse_completion(&content));
        match parsed {
            Ok(transactions) => {
                debug!(pages = ?chunk.pages, count = transactions.len(), "completion chunk parsed");
                let single_page = match chunk.pages.as_slice() {
                    [page] => Some(*page),
                    _ => None,
                };
                merged.extend(transactions.into_iter().map(|mut transaction| {
                    if transaction.source_page.is_none() {
                        transaction.source_page = single_page;
                    }
                    transaction
                }));
            }
            Err(err) => {
                warn!(pages = ?chunk.pages, error = %err, "completion chunk failed");
                outcome.failures.push(ChunkFailure {
                    pages: chunk.pages,
                    message: err.to_string(),
                });
            }
        }
    }
    outcome.transactions = dedupe_transactions(merged);
    Ok(outcome)
}

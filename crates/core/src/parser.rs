//! Two-pass extraction over accumulated engine output
//!
//! Engine output mixes protocol records with free-form text. Extraction
//! never fails: when the structured layer is missing or corrupt, the result
//! degrades to plain-text heuristics and estimated usage rather than
//! erroring. The supervisor treats the outcome of this module as
//! authoritative for successful invocations.

use tracing::debug;

use crate::invocation::TokenUsage;
use crate::protocol::{decode_line, StreamEvent};

/// Extracted response text plus token usage for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub extracted_text: String,
    pub token_usage: TokenUsage,
}

/// Extract the canonical response text and token usage from raw output.
///
/// Two independent passes over the lines of `raw_output`:
///
/// * forward, for the **first** well-formed agent message: the engine's
///   single canonical response;
/// * backward, for the **last** well-formed token-usage record: the engine
///   reports cumulative counts, so the tail value is final.
///
/// A line that fails to decode is skipped; one corrupt line never aborts a
/// pass. Without an agent message the text falls back to the
/// horizontal-rule heuristic, then to the raw output verbatim (trimmed).
/// Without a usage record the counts are estimated from `original_input`
/// and the extracted text and flagged `exact: false`.
///
/// Empty output is a valid outcome: empty text, zero estimated usage.
pub fn parse(raw_output: &str, original_input: &str) -> ParseOutcome {
    if raw_output.trim().is_empty() {
        return ParseOutcome {
            extracted_text: String::new(),
            token_usage: TokenUsage::default(),
        };
    }

    let extracted_text = extract_text(raw_output);
    let token_usage = match extract_usage(raw_output) {
        Some(usage) => usage,
        None => {
            debug!("no token_count record decoded; estimating usage");
            TokenUsage::estimated(
                estimate_tokens(original_input),
                estimate_tokens(&extracted_text),
            )
        }
    };

    ParseOutcome {
        extracted_text,
        token_usage,
    }
}

/// Forward pass for the first agent message, then the plain-text fallbacks.
fn extract_text(raw_output: &str) -> String {
    for line in raw_output.lines() {
        if let Some(StreamEvent::AgentMessage(text)) = decode_line(line) {
            return text;
        }
    }

    debug!("no agent_message record decoded; using plain-text fallback");
    if let Some(tail) = text_after_last_rule(raw_output) {
        return tail;
    }
    raw_output.trim().to_string()
}

/// Backward pass for the last token-usage record.
fn extract_usage(raw_output: &str) -> Option<TokenUsage> {
    for line in raw_output.lines().rev() {
        if let Some(StreamEvent::TokenUsage {
            input,
            output,
            total,
        }) = decode_line(line)
        {
            return Some(TokenUsage::exact(input, output, total));
        }
    }
    None
}

/// Plain-text engines print a horizontal rule between banner and answer.
/// Take the text after the last rule line, if there is one and it is
/// non-empty.
fn text_after_last_rule(raw_output: &str) -> Option<String> {
    let lines: Vec<&str> = raw_output.lines().collect();
    let rule_idx = lines.iter().rposition(|line| is_rule_line(line))?;
    let tail = lines[rule_idx + 1..].join("\n");
    let tail = tail.trim();
    if tail.is_empty() {
        None
    } else {
        Some(tail.to_string())
    }
}

fn is_rule_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 4 && trimmed.chars().all(|c| c == '-')
}

/// Generic character-count token estimate: one token per four characters,
/// rounded up.
pub fn approx_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

/// Token estimate tuned for dense non-Latin scripts, where a character
/// carries roughly a half token rather than a quarter: one token per two
/// characters, rounded up.
///
/// Kept distinct from [`approx_tokens`] on purpose; the two calibrations
/// predate this crate and have not been reconciled.
pub fn approx_tokens_dense(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(2)
}

/// Estimate tokens for a text, choosing the dense calibration only when the
/// text is predominantly non-ASCII.
fn estimate_tokens(text: &str) -> u64 {
    let total = text.chars().count();
    let non_ascii = text.chars().filter(|c| !c.is_ascii()).count();
    if non_ascii * 2 > total {
        approx_tokens_dense(text)
    } else {
        approx_tokens(text)
    }
}

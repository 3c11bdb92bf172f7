//! AI case summary over a lead's timeline.
//!
//! DESIGN
//! ======
//! The summary reads the cached timeline, keeps the newest
//! `AI_SUMMARY_MAX_INTERACTIONS` entries, renders them oldest-first as one
//! line each and sends them in a single user message. There is no
//! conversation state and no tool use.
//!
//! Requests pass the per-employee and global sliding windows in
//! [`crate::rate_limit`] before any LLM call is made.

use std::fmt::Write as _;

use axum::http::StatusCode;
use serde::Serialize;
use tracing::info;

use super::interaction::Interaction;
use super::lead::{LeadError, LeadRef};
use super::timeline::Timeline;
use crate::config::env_parse;
use crate::error::ErrorCode;
use crate::llm::{LlmError, Message};
use crate::rate_limit::RateLimitError;
use crate::state::AppState;

const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_MAX_INTERACTIONS: usize = 50;
const CONTENT_CHARS: usize = 500;

const SYSTEM_PROMPT: &str = "You are a paralegal assistant at a law firm. You receive the \
interaction history of one client lead: emails, WhatsApp messages, phone calls, meetings and \
internal notes, oldest first. Write a concise case summary for the handling lawyer: who the \
client is, what they need, what has been done, open commitments and the next step. Use short \
paragraphs or bullets. Do not invent facts that are not in the history.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryConfig {
    pub max_tokens: u32,
    pub max_interactions: usize,
}

impl SummaryConfig {
    /// `AI_SUMMARY_MAX_TOKENS`, `AI_SUMMARY_MAX_INTERACTIONS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_tokens: env_parse("AI_SUMMARY_MAX_TOKENS", DEFAULT_MAX_TOKENS),
            max_interactions: env_parse("AI_SUMMARY_MAX_INTERACTIONS", DEFAULT_MAX_INTERACTIONS).max(1),
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self { max_tokens: DEFAULT_MAX_TOKENS, max_interactions: DEFAULT_MAX_INTERACTIONS }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("LLM not configured")]
    NotConfigured,
    #[error("lead has no interactions to summarize")]
    NothingToSummarize,
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Lead(#[from] LeadError),
}

impl ErrorCode for SummaryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "E_LLM_NOT_CONFIGURED",
            Self::NothingToSummarize => "E_NOTHING_TO_SUMMARIZE",
            Self::RateLimited(e) => e.error_code(),
            Self::Llm(e) => e.error_code(),
            Self::Lead(e) => e.error_code(),
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            Self::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::NothingToSummarize => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimited(e) => e.http_status(),
            Self::Llm(e) => e.http_status(),
            Self::Lead(e) => e.http_status(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::RateLimited(e) => e.retryable(),
            Self::Llm(e) => e.retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseSummary {
    pub lead_id: LeadRef,
    pub summary: String,
    pub model: String,
    pub interactions_used: usize,
}

// =============================================================================
// PROMPT
// =============================================================================

fn clip(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut out: String = flat.chars().take(max).collect();
    out.push('…');
    out
}

fn render_line(item: &Interaction) -> String {
    let mut line = format!(
        "{} {} | {} {} | {}",
        item.date,
        item.time,
        item.kind.as_str(),
        item.direction.as_str(),
        item.employee
    );
    if let Some(contact) = &item.contact {
        let _ = write!(line, " (contact: {})", contact.name);
    }
    if let Some(length) = &item.length {
        let _ = write!(line, " [{length}]");
    }
    let _ = write!(line, ": {}", clip(&item.content, CONTENT_CHARS));
    if let Some(observation) = item.observation.as_deref().filter(|o| !o.trim().is_empty()) {
        let _ = write!(line, " / note: {}", clip(observation, CONTENT_CHARS));
    }
    line
}

/// The user message for a timeline, plus how many interactions it covers.
pub(crate) fn build_prompt(timeline: &Timeline, max_interactions: usize) -> (String, usize) {
    let newest = &timeline.items[..timeline.items.len().min(max_interactions)];
    let mut prompt = format!("Client: {}\n", timeline.lead.name);
    if let Some(email) = &timeline.lead.email {
        let _ = writeln!(prompt, "Email: {email}");
    }
    if !timeline.contacts.is_empty() {
        let names: Vec<&str> = timeline.contacts.iter().map(|c| c.name.as_str()).collect();
        let _ = writeln!(prompt, "Contacts: {}", names.join(", "));
    }
    let _ = writeln!(prompt, "\nHistory ({} of {} interactions, oldest first):", newest.len(), timeline.items.len());
    for item in newest.iter().rev() {
        prompt.push_str(&render_line(item));
        prompt.push('\n');
    }
    (prompt, newest.len())
}

// =============================================================================
// OPERATION
// =============================================================================

/// Summarize a lead's history with the configured LLM.
///
/// # Errors
///
/// See [`SummaryError`].
pub async fn summarize(state: &AppState, lead: LeadRef, employee: &str) -> Result<CaseSummary, SummaryError> {
    let llm = state.llm.as_ref().ok_or(SummaryError::NotConfigured)?;

    let timeline = state
        .timeline_cache
        .get_or_build(state.timeline_source.as_ref(), lead, state.timeline.batch_size, false)
        .await?;
    if timeline.items.is_empty() {
        return Err(SummaryError::NothingToSummarize);
    }
    // Only requests that will reach the LLM count against the window.
    state.rate_limiter.check_and_record(employee)?;

    let (prompt, used) = build_prompt(&timeline, state.summary.max_interactions);
    let response = llm
        .chat(state.summary.max_tokens, SYSTEM_PROMPT, &[Message::user(prompt)])
        .await?;

    info!(
        %lead,
        %employee,
        interactions = used,
        input_tokens = response.input_tokens,
        output_tokens = response.output_tokens,
        "case summary generated"
    );
    Ok(CaseSummary { lead_id: lead, summary: response.text, model: response.model, interactions_used: used })
}

#[cfg(test)]
#[path = "summary_test.rs"]
mod tests;

//! Errors surfaced by the agent router.

use thiserror::Error;

use knowdesk_core::embedding::ProviderError;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The completion provider failed (rate limit, auth, transport).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The classifier answered with something outside the five categories.
    #[error("invalid intent classification: '{0}' (expected one of CREATE_TICKET, UPDATE_TICKET, SUMMARIZE_PRIORITIZE, KNOWLEDGE, GENERAL_CHAT)")]
    InvalidIntent(String),

    /// The model's reply did not match the JSON contract of the agent.
    #[error("malformed {contract} output from model: {reason}")]
    MalformedOutput {
        contract: &'static str,
        reason: String,
    },

    /// The request does not satisfy the agent's card-selection rule.
    #[error("{0}")]
    Precondition(String),

    /// Retrieval or answer synthesis failed in the knowledge agent.
    #[error("knowledge query failed: {0:#}")]
    Knowledge(anyhow::Error),
}

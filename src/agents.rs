//! Intent classification and the agent router.
//!
//! Every orchestration call makes one classification request that maps the
//! user's message to exactly one [`Intent`], then hands the request to the
//! agent registered for that intent:
//!
//! | Intent | Agent | Rule | Result |
//! |--------|-------|------|--------|
//! | `CREATE_TICKET` | [`TicketCreationAgent`] | none | [`AgentResult::TicketCreation`] |
//! | `UPDATE_TICKET` | [`TicketUpdateAgent`] | exactly one card | [`AgentResult::TicketUpdate`] |
//! | `SUMMARIZE_PRIORITIZE` | [`SummarizeAgent`] | at least one card | [`AgentResult::Analysis`] |
//! | `KNOWLEDGE` | [`KnowledgeAgent`] | none | [`AgentResult::Knowledge`] |
//! | `GENERAL_CHAT` | [`GeneralChatAgent`] | none | [`AgentResult::Chat`] |
//!
//! There is no fallback anywhere: a classifier reply outside the five
//! categories, a reply that breaks an agent's JSON contract, or a provider
//! error is returned to the caller as an [`AgentError`]. The router holds no
//! state between calls.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use knowdesk_core::completion::{ChatMessage, CompletionOptions, CompletionProvider};

use crate::answer::{AnswerSynthesizer, SourceRef};
use crate::error::AgentError;

// ═══════════════════════════════════════════════════════════════════════
// Intent
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    CreateTicket,
    UpdateTicket,
    SummarizePrioritize,
    Knowledge,
    GeneralChat,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::CreateTicket,
        Intent::UpdateTicket,
        Intent::SummarizePrioritize,
        Intent::Knowledge,
        Intent::GeneralChat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::CreateTicket => "CREATE_TICKET",
            Intent::UpdateTicket => "UPDATE_TICKET",
            Intent::SummarizePrioritize => "SUMMARIZE_PRIORITIZE",
            Intent::Knowledge => "KNOWLEDGE",
            Intent::GeneralChat => "GENERAL_CHAT",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = AgentError;

    /// Trims and uppercases, then requires an exact category name.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_uppercase();
        Intent::ALL
            .into_iter()
            .find(|i| i.as_str() == normalized)
            .ok_or(AgentError::InvalidIntent(normalized))
    }
}

const CLASSIFIER_PROMPT: &str = "You are an intelligent router agent. Analyze the user's request and classify their intent.

1. CREATE_TICKET - User wants to create a new ticket/issue/task
2. UPDATE_TICKET - User wants to update/edit an existing ticket
3. SUMMARIZE_PRIORITIZE - User wants to summarize or prioritize tasks
4. KNOWLEDGE - User is asking about project documentation/architecture
5. GENERAL_CHAT - General questions

Respond with ONLY the category name. No explanation.";

/// One completion call per message; no keyword heuristics.
pub struct IntentClassifier {
    llm: Arc<dyn CompletionProvider>,
    options: CompletionOptions,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn CompletionProvider>, options: CompletionOptions) -> Self {
        Self { llm, options }
    }

    pub async fn classify(&self, message: &str) -> Result<Intent, AgentError> {
        let messages = [
            ChatMessage::system(CLASSIFIER_PROMPT),
            ChatMessage::user(format!("Classify this request: \"{}\"", message)),
        ];
        let reply = self.llm.complete(&messages, &self.options).await?;
        reply.parse()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Requests and results
// ═══════════════════════════════════════════════════════════════════════

/// A task-board card the user selected as context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardContext {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "listName")]
    pub list_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrchestrateRequest {
    pub message: String,
    #[serde(default)]
    pub selected_cards: Vec<CardContext>,
    #[serde(default)]
    pub knowledge_base_id: Option<String>,
}

/// JSON contract of the ticket creation agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDraft {
    pub title: String,
    pub description: String,
    pub suggested_list: String,
    pub priority: String,
}

/// JSON contract of the ticket update agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketUpdate {
    pub title: String,
    pub description: String,
    pub reasoning: String,
}

/// Outcome of one orchestration call, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentResult {
    TicketCreation {
        data: TicketDraft,
    },
    TicketUpdate {
        data: TicketUpdate,
        #[serde(rename = "cardId")]
        card_id: String,
    },
    Analysis {
        response: String,
    },
    Knowledge {
        response: String,
        sources: Vec<SourceRef>,
    },
    Chat {
        response: String,
    },
}

impl AgentResult {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentResult::TicketCreation { .. } => "ticket_creation",
            AgentResult::TicketUpdate { .. } => "ticket_update",
            AgentResult::Analysis { .. } => "analysis",
            AgentResult::Knowledge { .. } => "knowledge",
            AgentResult::Chat { .. } => "chat",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Agent trait
// ═══════════════════════════════════════════════════════════════════════

/// Shared capabilities handed to every agent.
pub struct AgentContext {
    pub llm: Arc<dyn CompletionProvider>,
    pub options: CompletionOptions,
    /// Answer synthesizer for knowledge questions; `None` leaves the
    /// knowledge agent able to answer only without a knowledge base.
    pub knowledge: Option<Arc<AnswerSynthesizer>>,
}

impl AgentContext {
    async fn ask(&self, system: &str, user: String) -> Result<String, AgentError> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        Ok(self.llm.complete(&messages, &self.options).await?)
    }
}

/// A specialized request handler selected by intent.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// The intent this agent serves.
    fn intent(&self) -> Intent;

    async fn handle(
        &self,
        request: &OrchestrateRequest,
        ctx: &AgentContext,
    ) -> Result<AgentResult, AgentError>;
}

/// Parse a model reply that must be a single JSON object.
fn parse_contract<T: DeserializeOwned>(contract: &'static str, reply: &str) -> Result<T, AgentError> {
    serde_json::from_str(reply.trim()).map_err(|e| AgentError::MalformedOutput {
        contract,
        reason: e.to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in agents
// ═══════════════════════════════════════════════════════════════════════

pub struct TicketCreationAgent;

#[async_trait]
impl Agent for TicketCreationAgent {
    fn name(&self) -> &str {
        "ticket-creation"
    }
    fn description(&self) -> &str {
        "Drafts a new ticket from a free-text request"
    }
    fn intent(&self) -> Intent {
        Intent::CreateTicket
    }

    async fn handle(
        &self,
        request: &OrchestrateRequest,
        ctx: &AgentContext,
    ) -> Result<AgentResult, AgentError> {
        let system = "You are a ticket creation specialist. Based on the user's request, generate a well-structured ticket.\n\
                      Respond in JSON: {\"title\": \"...\", \"description\": \"...\", \"suggestedList\": \"...\", \"priority\": \"...\"}";
        let mut user = format!("Create ticket from: \"{}\"", request.message);
        if !request.selected_cards.is_empty() {
            let titles: Vec<&str> = request.selected_cards.iter().map(|c| c.title.as_str()).collect();
            user.push_str(&format!(" Current cards: {}", titles.join(", ")));
        }

        let reply = ctx.ask(system, user).await?;
        let data: TicketDraft = parse_contract("ticket creation", &reply)?;
        info!(title = %data.title, "ticket drafted");
        Ok(AgentResult::TicketCreation { data })
    }
}

pub struct TicketUpdateAgent;

#[async_trait]
impl Agent for TicketUpdateAgent {
    fn name(&self) -> &str {
        "ticket-update"
    }
    fn description(&self) -> &str {
        "Suggests edits to exactly one selected ticket"
    }
    fn intent(&self) -> Intent {
        Intent::UpdateTicket
    }

    async fn handle(
        &self,
        request: &OrchestrateRequest,
        ctx: &AgentContext,
    ) -> Result<AgentResult, AgentError> {
        let card = match request.selected_cards.as_slice() {
            [card] => card,
            [] => {
                return Err(AgentError::Precondition(
                    "Please select a single card to update".into(),
                ))
            }
            many => {
                return Err(AgentError::Precondition(format!(
                    "Please select a single card to update ({} selected)",
                    many.len()
                )))
            }
        };

        let system = "Suggest improvements to this ticket. Respond in JSON: {\"title\": \"...\", \"description\": \"...\", \"reasoning\": \"...\"}";
        let user = format!(
            "Current: {}\n{}\n\nRequest: {}",
            card.title,
            card.description.as_deref().unwrap_or(""),
            request.message
        );

        let reply = ctx.ask(system, user).await?;
        let data: TicketUpdate = parse_contract("ticket update", &reply)?;
        Ok(AgentResult::TicketUpdate {
            data,
            card_id: card.id.clone(),
        })
    }
}

pub struct SummarizeAgent;

#[async_trait]
impl Agent for SummarizeAgent {
    fn name(&self) -> &str {
        "summarize-prioritize"
    }
    fn description(&self) -> &str {
        "Summarizes selected tickets with priority recommendations"
    }
    fn intent(&self) -> Intent {
        Intent::SummarizePrioritize
    }

    async fn handle(
        &self,
        request: &OrchestrateRequest,
        ctx: &AgentContext,
    ) -> Result<AgentResult, AgentError> {
        if request.selected_cards.is_empty() {
            return Err(AgentError::Precondition(
                "Please select at least one card to analyze".into(),
            ));
        }

        let system = "Analyze these tickets and provide a summary with priority recommendations. Be concise and actionable.";
        let user = format!(
            "{}\n\nTickets:\n{}",
            request.message,
            card_digest(&request.selected_cards)
        );
        let response = ctx.ask(system, user).await?;
        Ok(AgentResult::Analysis { response })
    }
}

/// Numbered digest: `N. title (status)` followed by the indented description.
fn card_digest(cards: &[CardContext]) -> String {
    cards
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let status = c
                .status
                .as_deref()
                .filter(|s| !s.is_empty())
                .or(c.list_name.as_deref().filter(|s| !s.is_empty()))
                .unwrap_or("No status");
            format!(
                "{}. {} ({})\n   {}",
                i + 1,
                c.title,
                status,
                c.description.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct KnowledgeAgent;

#[async_trait]
impl Agent for KnowledgeAgent {
    fn name(&self) -> &str {
        "knowledge"
    }
    fn description(&self) -> &str {
        "Answers documentation questions from the knowledge base"
    }
    fn intent(&self) -> Intent {
        Intent::Knowledge
    }

    async fn handle(
        &self,
        request: &OrchestrateRequest,
        ctx: &AgentContext,
    ) -> Result<AgentResult, AgentError> {
        let Some(kb_id) = request.knowledge_base_id.as_deref() else {
            let system = "You are a helpful assistant. Answer the user's question based on general knowledge.";
            let response = ctx.ask(system, request.message.clone()).await?;
            return Ok(AgentResult::Knowledge {
                response,
                sources: Vec::new(),
            });
        };

        let synthesizer = ctx.knowledge.as_ref().ok_or_else(|| {
            AgentError::Knowledge(anyhow::anyhow!(
                "no answer synthesizer configured"
            ))
        })?;
        let answer = synthesizer
            .answer(kb_id, &request.message)
            .await
            .map_err(AgentError::Knowledge)?;
        info!(kb = kb_id, sources = answer.sources.len(), "knowledge answer");
        Ok(AgentResult::Knowledge {
            response: answer.answer,
            sources: answer.sources,
        })
    }
}

pub struct GeneralChatAgent;

#[async_trait]
impl Agent for GeneralChatAgent {
    fn name(&self) -> &str {
        "general-chat"
    }
    fn description(&self) -> &str {
        "Answers general questions about the selected cards"
    }
    fn intent(&self) -> Intent {
        Intent::GeneralChat
    }

    async fn handle(
        &self,
        request: &OrchestrateRequest,
        ctx: &AgentContext,
    ) -> Result<AgentResult, AgentError> {
        let system = "You are a helpful AI assistant for a project management board. Answer questions about the selected cards.";
        let cards = if request.selected_cards.is_empty() {
            "No cards selected".to_string()
        } else {
            let lines: Vec<String> = request
                .selected_cards
                .iter()
                .map(|c| {
                    format!(
                        "- {}: {}",
                        c.title,
                        c.description.as_deref().unwrap_or("No description")
                    )
                })
                .collect();
            format!("Selected cards:\n{}", lines.join("\n"))
        };
        let response = ctx
            .ask(system, format!("{}\n\nQuestion: {}", cards, request.message))
            .await?;
        Ok(AgentResult::Chat { response })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry and router
// ═══════════════════════════════════════════════════════════════════════

/// Agents keyed by the intent they serve.
pub struct AgentRegistry {
    agents: Vec<Box<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self { agents: Vec::new() }
    }

    /// A registry with one built-in agent per intent.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(TicketCreationAgent));
        registry.register(Box::new(TicketUpdateAgent));
        registry.register(Box::new(SummarizeAgent));
        registry.register(Box::new(KnowledgeAgent));
        registry.register(Box::new(GeneralChatAgent));
        registry
    }

    /// Register an agent, replacing any agent already serving its intent.
    pub fn register(&mut self, agent: Box<dyn Agent>) {
        self.agents.retain(|a| a.intent() != agent.intent());
        self.agents.push(agent);
    }

    pub fn find(&self, intent: Intent) -> Option<&dyn Agent> {
        self.agents
            .iter()
            .find(|a| a.intent() == intent)
            .map(|a| a.as_ref())
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

pub struct AgentRouter {
    classifier: IntentClassifier,
    registry: AgentRegistry,
    ctx: AgentContext,
}

impl AgentRouter {
    pub fn new(ctx: AgentContext, registry: AgentRegistry) -> Self {
        let classifier = IntentClassifier::new(ctx.llm.clone(), ctx.options);
        Self {
            classifier,
            registry,
            ctx,
        }
    }

    /// Classify the message and dispatch to the matching agent.
    pub async fn orchestrate(&self, request: &OrchestrateRequest) -> Result<AgentResult, AgentError> {
        let intent = self.classifier.classify(&request.message).await?;
        let agent = self
            .registry
            .find(intent)
            .ok_or_else(|| AgentError::InvalidIntent(format!("{} (no agent registered)", intent)))?;
        info!(intent = %intent, agent = agent.name(), cards = request.selected_cards.len(), "routing request");

        let result = agent.handle(request, &self.ctx).await?;
        info!(result = result.kind(), "request completed");
        Ok(result)
    }
}

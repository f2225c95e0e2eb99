//! CLI command implementations.
//!
//! Each `run_*` function loads what it needs from the config, performs one
//! command, and prints a plain-text report to stdout. Logs go to stderr.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::agents::{CardContext, OrchestrateRequest};
use crate::answer::query_knowledge;
use crate::config::Config;
use crate::gitlab::GitLabClient;
use crate::ingest::{status, RunSummary, StatusQuery};
use crate::services::Services;

use knowdesk_core::models::KbStatus;
use knowdesk_core::store::KnowledgeBaseStore;

/// `knowdesk ingest`: trigger a run and wait for it.
pub async fn run_ingest(
    config: &Config,
    workspace_id: &str,
    project_id: &str,
    token: Option<String>,
) -> Result<()> {
    let services = Services::open(config).await?;
    let source = Arc::new(GitLabClient::from_config(&config.gitlab, token)?);

    let job = services
        .ingest_service()
        .trigger(workspace_id, project_id, source)
        .await?;
    println!("Knowledge base {} is processing.", job.config_id);

    let summary = job.wait().await?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Ingestion complete");
    println!("==================");
    println!("  Knowledge base:  {}", summary.knowledge_base_id);
    println!("  Wiki pages:      {}", summary.wikis);
    println!("  Merge requests:  {}", summary.merge_requests);
    println!("  Issues:          {}", summary.issues);
    println!("  Already indexed: {}", summary.skipped);
    println!("  Failed:          {}", summary.failed);
    println!("  New chunks:      {}", summary.new_chunks);
    println!();
    println!("  Documents:       {}", summary.total_documents);
    println!("  Chunks:          {}", summary.total_chunks);
    println!("  Elapsed:         {:.1}s", summary.elapsed.as_secs_f64());
}

/// `knowdesk status`: show a knowledge base by config ID or workspace.
pub async fn run_status(config: &Config, query: StatusQuery) -> Result<()> {
    let store = Services::open_store(config).await?;
    let Some(st) = status(store.as_ref(), &query).await? else {
        match query {
            StatusQuery::Config(id) => bail!("No knowledge base with id {}", id),
            StatusQuery::Workspace(ws) => bail!("No knowledge base for workspace {}", ws),
        }
    };

    println!("id:              {}", st.id);
    println!("workspace:       {}", st.workspace_id);
    println!("project:         {}", st.project_id);
    println!("enabled:         {}", st.enabled);
    println!("status:          {}", st.status);
    println!("documents:       {}", st.total_documents);
    println!("chunks:          {}", st.total_chunks);
    match st.last_indexed_at {
        Some(at) => println!("last_indexed_at: {}", at.to_rfc3339()),
        None => println!("last_indexed_at: never"),
    }
    if let Some(err) = st.error {
        println!("error:           {}", err);
    }
    Ok(())
}

/// `knowdesk ask`: answer a question from a completed knowledge base.
pub async fn run_ask(config: &Config, knowledge_base_id: &str, question: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let synthesizer = services.synthesizer();
    let answer = query_knowledge(
        services.store.as_ref(),
        &synthesizer,
        knowledge_base_id,
        question,
    )
    .await?;

    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("--- Sources ({}) ---", answer.sources.len());
        for (i, source) in answer.sources.iter().enumerate() {
            println!(
                "{}. [{:.3}] {} {}",
                i + 1,
                source.similarity,
                source.source_type,
                source.url.as_deref().unwrap_or("-")
            );
            println!("   {}", source.preview.replace('\n', " "));
        }
    }
    Ok(())
}

/// `knowdesk chat`: route a message through the agents and print the result
/// as JSON.
pub async fn run_chat(
    config: &Config,
    message: &str,
    cards: Vec<CardContext>,
    workspace_id: Option<String>,
) -> Result<()> {
    let services = Services::open(config).await?;

    let knowledge_base_id = match workspace_id {
        Some(ws) => services
            .store
            .find_by_workspace(&ws)
            .await?
            .filter(|kb| kb.status == KbStatus::Completed)
            .map(|kb| kb.id),
        None => None,
    };

    let request = OrchestrateRequest {
        message: message.to_string(),
        selected_cards: cards,
        knowledge_base_id,
    };
    let result = services.router().orchestrate(&request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// `knowdesk reset`: delete a knowledge base with its chunks and ledger.
pub async fn run_reset(config: &Config, knowledge_base_id: &str) -> Result<()> {
    let store = Services::open_store(config).await?;
    let deleted = store
        .delete_knowledge_base(knowledge_base_id)
        .await
        .with_context(|| format!("Failed to delete knowledge base {}", knowledge_base_id))?;
    if !deleted {
        bail!("No knowledge base with id {}", knowledge_base_id);
    }
    println!("Deleted knowledge base {}.", knowledge_base_id);
    Ok(())
}

const CARD_FIELDS: [&str; 5] = ["id", "title", "description", "status", "list"];

/// Parse `--card id=..,title=..[,description=..][,status=..][,list=..]`.
///
/// A comma starts a new field only when it is followed by a known key and
/// `=`; otherwise it belongs to the current value.
pub fn parse_card(raw: &str) -> Result<CardContext, String> {
    let mut fields: Vec<(&str, String)> = Vec::new();
    for segment in raw.split(',') {
        let known = segment
            .split_once('=')
            .map(|(key, value)| (key.trim(), value))
            .filter(|(key, _)| CARD_FIELDS.contains(key));
        if let Some((key, value)) = known {
            fields.push((key, value.to_string()));
            continue;
        }
        let Some((_, value)) = fields.last_mut() else {
            return Err(format!(
                "invalid card field '{}': expected one of {}",
                segment,
                CARD_FIELDS.join(", ")
            ));
        };
        value.push(',');
        value.push_str(segment);
    }

    let mut card = CardContext::default();
    for (key, value) in fields {
        let value = value.trim().to_string();
        match key {
            "id" => card.id = value,
            "title" => card.title = value,
            "description" => card.description = Some(value),
            "status" => card.status = Some(value),
            _ => card.list_name = Some(value),
        }
    }
    if card.id.is_empty() || card.title.is_empty() {
        return Err("a card needs at least id and title".to_string());
    }
    Ok(card)
}

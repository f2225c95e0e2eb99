//! # knowdesk
//!
//! Per-workspace knowledge bases built from GitLab project artifacts, and an
//! assistant that routes free-form messages to specialized agents.
//!
//! knowdesk pulls wiki pages, merged merge requests, and open issues (with
//! their discussion comments) from a GitLab project, splits them into
//! paragraph-aligned chunks, embeds the chunks in rate-limit-aware batches,
//! and stores them in SQLite. Questions are answered by ranking stored chunks
//! by cosine similarity and handing the best ones to a chat model as context.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │   GitLab    │──▶│  Ingestion   │──▶│  SQLite  │
//! │ wiki/MR/iss │   │ Chunk+Embed  │   │ chunks   │
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                 ┌──────────┐       ┌─────────────┐
//!                 │   Ask    │◀──────│ Agent router│
//!                 │ (RAG)    │       │ (5 intents) │
//!                 └──────────┘       └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! knowdesk init
//! knowdesk ingest --workspace ws-1 --project group/app
//! knowdesk status --workspace ws-1
//! knowdesk ask --kb <id> "How do we deploy to staging?"
//! knowdesk chat "Create a ticket for the flaky login test"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the storage traits |
//! | [`provider`] | OpenAI / Ollama embedding and chat providers |
//! | [`batch`] | Batched embedding with rate-limit backoff |
//! | [`source`] | Source collaborator trait and GitLab payload types |
//! | [`gitlab`] | GitLab REST client |
//! | [`ingest`] | Ingestion pipeline, background jobs, status |
//! | [`retrieve`] | Query embedding and similarity ranking |
//! | [`answer`] | Answer synthesis and the knowledge query interface |
//! | [`agents`] | Intent classifier, agents, and router |
//! | [`error`] | Agent error type |
//! | [`services`] | Wiring from config to components |
//! | [`commands`] | CLI command implementations |

pub mod agents;
pub mod answer;
pub mod batch;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod gitlab;
pub mod ingest;
pub mod migrate;
pub mod provider;
pub mod retrieve;
pub mod services;
pub mod source;
pub mod sqlite_store;

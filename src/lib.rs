//! # Deep Research
//!
//! A front end for a remote AI content-generation service that produces
//! long-form research documents.
//!
//! Documents live in the service's object store as JSON objects tagged with
//! a research area and topic. This crate lists and filters them, renders
//! their markdown for reading, exports them to paginated PDF, deletes them,
//! and starts new generation jobs whose completion is detected by polling
//! the object store (or by a fixed estimated duration).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ RemoteService│◀──│ CatalogStore │◀──│ Orchestrator │
//! │ HTTP / memory│   │  (snapshot)  │   │  (job slot)  │
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                           │                  │
//!                           ▼                  ▼
//!                      ┌─────────────────────────┐
//!                      │      App controller     │
//!                      │ form · filters · viewer │
//!                      └──────┬───────────┬──────┘
//!                             ▼           ▼
//!                        ┌────────┐  ┌────────┐
//!                        │  CLI   │  │  HTTP  │
//!                        │research│  │ server │
//!                        └────────┘  └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export RESEARCH_API_KEY=...
//! research topics
//! research list --category Markets
//! research generate --area Markets --topic GDP
//! research export <id> --out ./pdf
//! research serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and the research taxonomy |
//! | [`error`] | Domain error type |
//! | [`models`] | Remote objects, documents, research parameters |
//! | [`client`] | Remote service trait and `reqwest` client |
//! | [`memory`] | In-process remote service for tests and demos |
//! | [`catalog`] | Object-to-document transformation, filtering, refresh |
//! | [`scheduler`] | Cancellable timers and periodic tasks |
//! | [`orchestrator`] | Single-slot generation job lifecycle |
//! | [`progress`] | Job progress reporters |
//! | [`render`] | Markdown rendering, list view, document viewer |
//! | [`pdf`] | Styled PDF export |
//! | [`controller`] | UI state and actions |
//! | [`commands`] | CLI entry points |
//! | [`server`] | HTTP server |

pub mod catalog;
pub mod client;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod pdf;
pub mod progress;
pub mod render;
pub mod scheduler;
pub mod server;

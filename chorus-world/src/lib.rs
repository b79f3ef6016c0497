//! # chorus-world: the conversation runtime
//!
//! This crate ties the synchronous `chorus-core` pipeline to a model
//! collaborator from `chorus-llm` and runs it turn by turn.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Simulation                   │
//! │  ┌────────────┐  ┌──────────────────────┐    │
//! │  │ WorldState │  │  ResponseValidator   │    │
//! │  └─────┬──────┘  └──────────┬───────────┘    │
//! │        │                    │                │
//! │        ▼                    ▼                │
//! │  ┌──────────────┐   ┌───────────────┐        │
//! │  │ chorus-core  │   │  chorus-llm   │        │
//! │  └──────┬───────┘   └───────────────┘        │
//! │         ▼                                    │
//! │  WorldStore (SQLite)   ReportSink (JSON)     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `dialogue`: reply validation, forced retry, fallbacks
//! - `world`: cast, history, relationships, turn bookkeeping
//! - `simulation`: the cancellable turn loop and persistence hooks
//! - `report`: relationship snapshot reports

pub mod dialogue;
pub mod report;
pub mod simulation;
pub mod world;

pub use dialogue::{Reply, ResponseValidator};
pub use report::{JsonReportSink, ReportSink};
pub use simulation::{RunSummary, Simulation};
pub use world::WorldState;

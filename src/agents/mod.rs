//! Query Agent Adapter
//!
//! Binds a single-table store and a hosted model into a SQL agent and runs one
//! natural-language question through it:
//!
//! ```text
//!   question
//!      │
//!      ▼
//! ┌─────────────┐   Action / Action Input   ┌──────────────┐
//! │  SqlAgent   │ ────────────────────────▶ │ SqlDatabase  │  (read-only,
//! │ (ReAct loop)│ ◀──────────────────────── │   toolkit    │   allow-listed)
//! └─────────────┘        Observation        └──────────────┘
//!      │
//!      ▼
//!  Final Answer
//! ```
//!
//! Reasoning belongs to the model. This module only supplies the tools, the
//! prompt and the iteration cap.

pub mod prompt;
pub mod sql_agent;
pub mod toolkit;

pub use sql_agent::{run_query, AgentOutcome, AgentSettings, AgentStep, SqlAgent, ITERATION_LIMIT_ANSWER};
pub use toolkit::SqlDatabase;

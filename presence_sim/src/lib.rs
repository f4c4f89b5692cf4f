//! Persona Presence Simulation Harness
//!
//! This crate runs multi-persona presence scenarios against a simulated
//! product surface and the scenario-scoped protocol mock, deterministically
//! for a given seed.
//!
//! # Core Principle: One World Per Run
//!
//! Every scenario run builds its own pieces and shares nothing with the next:
//! - **Time**: virtual clock, advanced only by simulated navigation
//! - **Product**: simulated browser sessions with isolated storage and
//!   injectable faults
//! - **Protocol**: a fresh `PresenceServer` seeded from the script
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                       │
//! │  ┌──────────────┐   ┌─────────────────────────────────┐  │
//! │  │ SimContext   │   │ Orchestrator                    │  │
//! │  │ (clock, rng) │   │  ┌─────────┐      ┌─────────┐   │  │
//! │  └──────┬───────┘   │  │ Actor A │ ...  │ Actor N │   │  │
//! │         │           │  └──┬───┬──┘      └──┬───┬──┘   │  │
//! │  ┌──────▼───────┐   │     │   │            │   │      │  │
//! │  │ SimBrowser   │◄──┼─────┘   │            ┘   │      │  │
//! │  └──────────────┘   │         ▼                ▼      │  │
//! │                     │     PresenceServer (mock)       │  │
//! │                     └─────────────────────────────────┘  │
//! │        TelemetryCollector per persona ──► artifacts/     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use presence_sim::{HarnessConfig, ScenarioRunner, ScenarioId};
//!
//! let runner = ScenarioRunner::new(HarnessConfig::default().with_seed(7));
//! let result = runner.run(ScenarioId::PanicExit).await;
//! assert!(result.passed);
//! ```

mod browser;
pub mod config;
mod context;
pub mod fixtures;
pub mod orchestrator;
mod runner;
pub mod scenarios;
pub mod summary;

pub use browser::{hosts_affordance, SimBrowser, SimBrowserController, SimPage};
pub use config::{ConfigError, HarnessConfig};
pub use context::SimContext;
pub use orchestrator::{ActorSession, ActorSet, Orchestrator, OrchestratorError, SessionError, WaitBounds};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use summary::write_report;

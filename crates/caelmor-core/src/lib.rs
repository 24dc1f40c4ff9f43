//! Tick scheduler, runtime arena, and orchestration for the Caelmor runtime
//! core.
//!
//! This crate owns the tick cycle that drives the simulation: Boundary,
//! Pre-Tick Gate Evaluation, Simulation Execution, and Post-Tick
//! Finalization. All authoritative state lives in one [`Arena`] owned by
//! the [`Runtime`]; every mutation is staged and swapped in whole.
//!
//! # Modules
//!
//! - [`arena`] -- The single-writer arena over every registry.
//! - [`clock`] -- Tick counter and phase state machine.
//! - [`config`] -- Configuration loading from `caelmor-config.yaml`.
//! - [`decision`] -- [`DecisionSource`] trait, perception, and the
//!   reference sources.
//! - [`eligibility`] -- The frozen per-tick eligible set.
//! - [`error`] -- [`TickError`] and its taxonomy mapping.
//! - [`operator`] -- Pause, resume, and stop controls.
//! - [`participants`] -- Save participants backed by the runtime.
//! - [`requests`] -- Boundary request queue and player input queue.
//! - [`runner`] -- The fixed-rate async loop.
//! - [`runtime`] -- [`Runtime`]: boundary discipline, save, and restore.
//! - [`system`] -- [`SimulationSystem`] trait and staged writes.
//! - [`tick`] -- Gate, execute, and commit.
//!
//! [`Arena`]: arena::Arena
//! [`Runtime`]: runtime::Runtime
//! [`DecisionSource`]: decision::DecisionSource
//! [`TickError`]: error::TickError
//! [`SimulationSystem`]: system::SimulationSystem

pub mod arena;
pub mod clock;
pub mod config;
pub mod decision;
pub mod eligibility;
pub mod error;
pub mod operator;
pub mod participants;
pub mod requests;
pub mod runner;
pub mod runtime;
pub mod system;
pub mod tick;

pub use arena::{Arena, RetainedWorld};
pub use clock::{ClockError, TickClock};
pub use config::{ConfigError, ServerConfig};
pub use decision::{DecisionSource, IdleDecisionSource, Perception, WanderDecisionSource};
pub use eligibility::EligibleSet;
pub use error::TickError;
pub use operator::{OperatorState, SimulationEndReason};
pub use requests::{BoundaryRequest, QueuedRequest};
pub use runner::{NoOpCallback, RunnerError, SimulationResult, TickCallback, run_simulation};
pub use runtime::{BoundaryReport, RejectedRequest, Runtime};
pub use system::{ExecutionContext, IntentSystem, SimulationSystem, TickWrites};
pub use tick::{CommitFault, TickPipeline, TickReport};

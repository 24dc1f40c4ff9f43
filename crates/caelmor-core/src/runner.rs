//! The fixed-rate shard loop.
//!
//! [`run_simulation`] calls [`Runtime::run_tick`] once per clock period and
//! checks the operator controls only at boundaries. After every commit a
//! [`TickCallback`] reads the finalized state. It runs on the loop, so
//! anything slow it needs (encoding, disk) must be handed off.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::TickError;
use crate::operator::{OperatorState, SimulationEndReason};
use crate::runtime::Runtime;
use crate::tick::{TickPipeline, TickReport};

/// Errors that end a simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A tick aborted.
    #[error("tick error: {source}")]
    Tick {
        /// The underlying tick error.
        #[from]
        source: TickError,
    },
}

/// Outcome of a run that ended cleanly.
#[derive(Debug)]
pub struct SimulationResult {
    /// Why the run ended.
    pub end_reason: SimulationEndReason,
    /// Report of the last committed tick, if any.
    pub final_report: Option<TickReport>,
    /// Ticks committed in this run.
    pub total_ticks: u64,
}

/// Receives every committed tick.
pub trait TickCallback: Send {
    /// Called at the boundary right after `report.tick` committed.
    fn on_tick(&mut self, report: &TickReport, runtime: &Runtime);
}

/// Callback that ignores every tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _report: &TickReport, _runtime: &Runtime) {}
}

/// Drive ticks until the budget runs out or the operator stops the run.
///
/// # Errors
///
/// Returns [`RunnerError`] when a tick aborts. The runtime is back at the
/// boundary with its last commit intact, and the operator records
/// [`SimulationEndReason::TickAborted`].
pub async fn run_simulation(
    runtime: &mut Runtime,
    pipeline: &mut TickPipeline,
    operator: &Arc<OperatorState>,
    callback: &mut dyn TickCallback,
) -> Result<SimulationResult, RunnerError> {
    let mut period = tokio::time::interval(runtime.clock().tick_duration());
    period.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut final_report = None;

    info!(
        start_tick = runtime.tick(),
        tick_rate_hz = runtime.clock().tick_rate_hz(),
        max_ticks = operator.max_ticks(),
        "Shard loop starting"
    );

    let end_reason = loop {
        if let Some(reason) = boundary_controls(runtime, operator).await {
            break reason;
        }

        period.tick().await;
        let report = match runtime.run_tick(pipeline) {
            Ok(report) => report,
            Err(err) => {
                operator.finish(SimulationEndReason::TickAborted);
                error!(tick = runtime.tick(), error = %err, "Shard loop abandoned");
                return Err(err.into());
            }
        };
        operator.record_tick();
        callback.on_tick(&report, runtime);
        final_report = Some(report);

        if operator.tick_limit_reached() {
            info!(tick = runtime.tick(), max_ticks = operator.max_ticks(), "Tick budget used up");
            break SimulationEndReason::MaxTicksReached;
        }
    };

    Ok(SimulationResult {
        end_reason: operator.finish(end_reason),
        final_report,
        total_ticks: operator.ticks_run(),
    })
}

/// Honour pause and stop at a boundary. Returns the end reason when the
/// run must end here.
async fn boundary_controls(
    runtime: &Runtime,
    operator: &OperatorState,
) -> Option<SimulationEndReason> {
    if operator.is_paused() {
        info!(tick = runtime.tick(), "Shard paused");
        operator.wait_while_paused().await;
        if !operator.is_stop_requested() {
            info!(tick = runtime.tick(), "Shard resumed");
        }
    }
    if operator.is_stop_requested() {
        info!(tick = runtime.tick(), "Stop requested by operator");
        return Some(SimulationEndReason::OperatorStop);
    }
    None
}

/// Log how a run ended.
pub fn log_simulation_end(result: &SimulationResult) {
    match &result.final_report {
        Some(report) => info!(
            reason = ?result.end_reason,
            total_ticks = result.total_ticks,
            final_tick = report.tick,
            eligible = report.eligible,
            digest = format_args!("{:016x}", report.digest),
            "Shard loop ended"
        ),
        None => warn!(reason = ?result.end_reason, "Shard loop ended before any tick committed"),
    }
}

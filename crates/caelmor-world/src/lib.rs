//! World and zone authority layer for the Caelmor runtime core.
//!
//! Authority flows strictly downward: Server -> World -> Zone -> Entities.
//! Worlds own zones exclusively; zones provide context and never own
//! entities; every residency change and every cross-zone influence is
//! mediated here.
//!
//! # Modules
//!
//! - [`error`] -- Error types for world and zone operations.
//! - [`world`] -- [`WorldRuntime`]: world lifecycle and zone ownership.
//! - [`zone`] -- [`ZoneRuntime`]: zone context values.
//! - [`residency`] -- Exclusive entity-to-zone association table.
//! - [`mediation`] -- Deterministic cross-zone effect ordering.
//! - [`registry`] -- [`WorldRegistry`]: the authority entry point.

pub mod error;
pub mod mediation;
pub mod registry;
pub mod residency;
pub mod world;
pub mod zone;

pub use error::WorldError;
pub use mediation::{MediationPlan, ZoneEffect};
pub use registry::{UnloadReport, WorldRegistry};
pub use residency::{Residency, ResidencyTable};
pub use world::WorldRuntime;
pub use zone::ZoneRuntime;

//! Cross-zone mediation.
//!
//! The only legal path for one zone's state to influence another's is a
//! [`ZoneEffect`] mediated by the owning world. Mediation is split into a
//! fallible planning step that validates and orders every effect, and an
//! infallible apply step, so a tick commit can validate everything before
//! touching anything.

use std::collections::BTreeMap;

use caelmor_types::{EntityKey, WorldId, ZoneId};

/// A requested influence of one zone on another zone's context.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZoneEffect {
    /// Zone the effect originates in.
    pub origin: ZoneId,
    /// Zone whose context is changed.
    pub target: ZoneId,
    /// Entity that caused the effect.
    pub source: EntityKey,
    /// Context key to change.
    pub key: String,
    /// Signed change to apply.
    pub delta: i64,
}

/// A validated, ordered set of context writes ready to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediationPlan {
    /// Final context values per `(world, zone, key)`.
    pub(crate) writes: BTreeMap<(WorldId, ZoneId, String), i64>,
    /// Effects in the order they were applied.
    pub(crate) ordered: Vec<ZoneEffect>,
}

impl MediationPlan {
    /// Effects in their deterministic application order.
    pub fn ordered_effects(&self) -> &[ZoneEffect] {
        &self.ordered
    }

    /// Whether the plan changes nothing.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Sort effects into their canonical order. Emission order never matters.
pub(crate) fn canonical_order(mut effects: Vec<ZoneEffect>) -> Vec<ZoneEffect> {
    effects.sort_by(|a, b| {
        (a.target, a.origin, a.source, &a.key, a.delta).cmp(&(
            b.target, b.origin, b.source, &b.key, b.delta,
        ))
    });
    effects
}

//! The contract every persisted system satisfies.

use caelmor_types::{PersistSystem, PersistedTruth};

/// A system that contributes records to a cross-system save.
///
/// The coordinator polls [`check_ready`](Self::check_ready) on every
/// participant before collecting anything, so a participant is never asked
/// to contribute while it is mid-tick or mid-transition.
pub trait SaveParticipant {
    /// Which node of the persistence graph this participant is.
    fn system(&self) -> PersistSystem;

    /// Report whether the participant is at a legal save boundary.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when it is not.
    fn check_ready(&self) -> Result<(), String>;

    /// Write this system's records into `truth`.
    fn contribute(&self, truth: &mut PersistedTruth);
}

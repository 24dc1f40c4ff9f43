//! Error types for the Caelmor server binary.
//!
//! [`ServerError`] wraps every failure mode of startup and the simulation
//! loop so `main` can propagate with `?`.

/// Top-level error for the server binary.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: caelmor_core::ConfigError,
    },

    /// Building or restoring the runtime failed.
    #[error("runtime error: {source}")]
    Runtime {
        /// The underlying tick error.
        #[from]
        source: caelmor_core::TickError,
    },

    /// Opening the save store failed.
    #[error("persistence error: {source}")]
    Persist {
        /// The underlying persistence error.
        #[from]
        source: caelmor_persist::PersistError,
    },

    /// The simulation loop stopped on an error.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: caelmor_core::RunnerError,
    },

    /// The autosave writer thread could not be started or joined.
    #[error("save writer error: {message}")]
    SaveWriter {
        /// Description of the failure.
        message: String,
    },
}

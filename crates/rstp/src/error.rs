//! Error types for the RSTP engine.

use crate::port::{PortRole, PortState};
use crate::timer::TimerId;
use crate::vector::PriorityVector;
use thiserror::Error;

/// Result type alias for engine operations.
pub type RstpResult<T> = Result<T, RstpError>;

/// Errors reported to the host.
///
/// Malformed protocol input is not an error: such vectors are dropped and
/// counted. These variants cover configuration mistakes and events the host
/// should never have delivered.
#[derive(Debug, Error)]
pub enum RstpError {
    /// Configuration rejected at initialization.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Event names a port the engine was not configured with.
    #[error("Unknown port: {0}")]
    UnknownPort(u16),

    /// Timer identifier the engine never handed out.
    #[error("Unknown timer: {0}")]
    UnknownTimer(TimerId),

    /// Event delivered before `start`.
    #[error("Engine not started")]
    NotStarted,

    /// `start` called twice.
    #[error("Engine already started")]
    AlreadyStarted,

    /// Configuration file is not valid TOML for [`crate::RstpConfig`].
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RstpError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error was caused by the configuration rather than
    /// by an event.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RstpError::InvalidConfig { .. } | RstpError::ConfigParse(_) | RstpError::Io(_)
        )
    }
}

/// Structural inconsistency found by [`crate::RstpEngine::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("more than one root port: {ports:?}")]
    MultipleRootPorts { ports: Vec<u16> },

    #[error("root port {recorded:?} does not match port roles {roles:?}")]
    RootPortMismatch {
        recorded: Option<u16>,
        roles: Vec<u16>,
    },

    #[error("port {port} is {role} but {state}")]
    InconsistentPort {
        port: u16,
        role: PortRole,
        state: PortState,
    },

    #[error("disabled port {0} holds state")]
    DisabledPortHoldsState(u16),

    #[error("root vector {root_vector} does not follow root port {root_port:?}")]
    RootVectorMismatch {
        root_vector: PriorityVector,
        root_port: Option<u16>,
    },

    #[error("root vector {0} worse than own claim")]
    RootVectorWorseThanOwn(PriorityVector),
}

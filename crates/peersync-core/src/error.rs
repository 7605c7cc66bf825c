//! Error types for peersync

use thiserror::Error;

use crate::{AgentId, PartyId, Timestamp};

/// Core peersync errors
#[derive(Error, Debug)]
pub enum SyncError {
    // Configuration errors
    #[error("Invalid agent spec: {0}")]
    InvalidAgentSpec(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Command errors
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Unknown verb: {0}")]
    UnknownVerb(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    // Registry errors
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("Agent {0} already exists")]
    DuplicateAgent(AgentId),

    #[error("Agent {caller} cannot admit an agent for party {party}")]
    CrossPartyAdmission { caller: AgentId, party: PartyId },

    #[error("Mailbox closed for agent {0}")]
    MailboxClosed(AgentId),

    // Log errors
    #[error("Log has no genesis delta")]
    NoGenesis,

    #[error("Genesis already set; deltas can only be appended")]
    GenesisAlreadySet,

    #[error("Delta at {attempted} is older than last delta at {last}")]
    OutOfOrder { last: Timestamp, attempted: Timestamp },

    #[error("Unknown document: {0}")]
    UnknownDocument(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    // Document errors
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Document schema errors, kept apart from parsing and transport failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Document is not UTF-8")]
    NotUtf8,

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Document must be a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// Result type for peersync operations
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Rejections a caller reports and moves past, as opposed to setup failures
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SyncError::DuplicateAgent(_)
                | SyncError::CrossPartyAdmission { .. }
                | SyncError::Unsupported(_)
                | SyncError::UnknownVerb(_)
                | SyncError::InvalidCommand(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_distinct_kind() {
        let err: SyncError = ValidationError::MissingField("publicKey").into();
        assert!(matches!(err, SyncError::Validation(ValidationError::MissingField(_))));
        assert_eq!(err.to_string(), "Missing required field: publicKey");
    }

    #[test]
    fn test_rejections() {
        let id: AgentId = "A.1".parse().unwrap();
        assert!(SyncError::DuplicateAgent(id).is_rejection());
        assert!(!SyncError::InvalidAgentSpec("x".into()).is_rejection());
    }
}

//! Event: an immutable record of something that happened in the core.
//!
//! Events are published on the in-process bus when a command completes, a
//! recipe trigger fires, or a hub connection changes state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandKind};
use crate::error::{CommandError, ErrorKind};
use crate::id::{DeviceId, EventId, RecipeId, TicketId};

/// Result of attempting one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Failed(CommandError),
}

impl Outcome {
    #[must_use]
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed(CommandError::new(kind, message))
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Ok => None,
            Self::Failed(err) => Some(err.kind),
        }
    }

    /// Convert into a `Result`, for callers that propagate with `?`.
    ///
    /// # Errors
    ///
    /// Returns the [`CommandError`] of a failed outcome.
    pub fn into_result(self) -> Result<(), CommandError> {
        match self {
            Self::Ok => Ok(()),
            Self::Failed(err) => Err(err),
        }
    }
}

impl From<Result<(), CommandError>> for Outcome {
    fn from(result: Result<(), CommandError>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(err) => Self::Failed(err),
        }
    }
}

/// Outcome record published for every attempted command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub ticket: TicketId,
    pub command_kind: CommandKind,
    pub target_device_id: Option<DeviceId>,
    pub target_address: Option<String>,
    pub outcome: Outcome,
}

impl OutcomeEvent {
    #[must_use]
    pub fn new(ticket: TicketId, command: &Command, outcome: Outcome) -> Self {
        Self {
            ticket,
            command_kind: command.kind(),
            target_device_id: command.target_device(),
            target_address: command.target_address().map(str::to_string),
            outcome,
        }
    }
}

/// Hub connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    DialFailed,
}

/// What an [`Event`] is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    CommandOutcome(OutcomeEvent),
    TriggerFired {
        recipe_id: RecipeId,
        recipe_name: String,
    },
    ConnectionStateChanged {
        device_id: DeviceId,
        state: ConnectionState,
    },
}

/// An immutable, timestamped event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Stamp a payload with a fresh id and the current time.
    #[must_use]
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            payload,
        }
    }

    #[must_use]
    pub fn outcome(event: OutcomeEvent) -> Self {
        Self::new(EventPayload::CommandOutcome(event))
    }

    #[must_use]
    pub fn trigger_fired(recipe_id: RecipeId, recipe_name: impl Into<String>) -> Self {
        Self::new(EventPayload::TriggerFired {
            recipe_id,
            recipe_name: recipe_name.into(),
        })
    }

    #[must_use]
    pub fn connection(device_id: DeviceId, state: ConnectionState) -> Self {
        Self::new(EventPayload::ConnectionStateChanged { device_id, state })
    }

    /// The outcome record, if this is a command outcome.
    #[must_use]
    pub fn as_outcome(&self) -> Option<&OutcomeEvent> {
        match &self.payload {
            EventPayload::CommandOutcome(outcome) => Some(outcome),
            _ => None,
        }
    }
}

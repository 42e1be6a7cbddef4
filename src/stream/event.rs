use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::instance::InstanceStatus;

use super::line::{StreamLine, StreamSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    StateChange {
        old: InstanceStatus,
        new: InstanceStatus,
    },

    StdLine {
        line: StreamLine,
    },

    /// Launcher-side status, e.g. a rejected console command.
    Notice {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEvent {
    pub id: Uuid,

    pub timestamp: DateTime<Utc>,

    pub payload: EventPayload,
}

impl InstanceEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn line<S: Into<String>>(line: S, source: StreamSource) -> Self {
        Self::new(EventPayload::StdLine {
            line: StreamLine::new(line, source),
        })
    }

    pub fn notice<S: Into<String>>(message: S) -> Self {
        Self::new(EventPayload::Notice {
            message: message.into(),
        })
    }

    pub fn state_change(old: InstanceStatus, new: InstanceStatus) -> Self {
        Self::new(EventPayload::StateChange { old, new })
    }
}

impl Display for InstanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            EventPayload::StdLine { line } => write!(f, "{}", line),
            EventPayload::StateChange { old, new } => {
                write!(f, "State changed: {:?} -> {:?}", old, new)
            }
            EventPayload::Notice { message } => write!(f, "{}", message),
        }
    }
}

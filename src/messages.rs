use serde::{Deserialize, Serialize};

use crate::models::{Listing, UserId};

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "join")]
    Join(JoinPayload),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum JoinPayload {
    Token { token: String },
    /// Bare user id, accepted only when unverified joins are enabled.
    UserId(UserId),
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "joined")]
    Joined {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    #[serde(rename = "new_listing")]
    NewListing {
        message: String,
        listing: Box<Listing>,
    },
    #[serde(rename = "personal_alert")]
    PersonalAlert {
        message: String,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn alert(message: impl Into<String>) -> Self {
        ServerMessage::PersonalAlert {
            message: message.into(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::NewListing { .. } => "new_listing",
            ServerMessage::PersonalAlert { .. } => "personal_alert",
            ServerMessage::Error { .. } => "error",
        }
    }
}

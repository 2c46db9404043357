use std::{fmt, str::FromStr};

use crate::{CommentId, Error, UserId, WorkspaceId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReactionType {
    Like,
    Love,
    Laugh,
    ThumbsUp,
    ThumbsDown,
    Confused,
    Heart,
}

impl ReactionType {
    pub const ALL: [ReactionType; 7] = [
        ReactionType::Like,
        ReactionType::Love,
        ReactionType::Laugh,
        ReactionType::ThumbsUp,
        ReactionType::ThumbsDown,
        ReactionType::Confused,
        ReactionType::Heart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionType::Like => "like",
            ReactionType::Love => "love",
            ReactionType::Laugh => "laugh",
            ReactionType::ThumbsUp => "thumbs_up",
            ReactionType::ThumbsDown => "thumbs_down",
            ReactionType::Confused => "confused",
            ReactionType::Heart => "heart",
        }
    }
}

impl fmt::Display for ReactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<ReactionType, Error> {
        ReactionType::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown reaction kind {s:?}")))
    }
}

/// A reaction row; at most one exists per (comment_id, user_id)
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Reaction {
    pub comment_id: CommentId,
    pub user_id: UserId,
    pub workspace_id: WorkspaceId,
    pub reaction_type: ReactionType,
}

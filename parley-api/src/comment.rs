use uuid::Uuid;

use crate::{EntityId, EntityType, Error, ThreadKey, Time, UserId, WorkspaceId, STUB_UUID};

/// Replies nested deeper than this are clamped to this level
pub const MAX_THREAD_LEVEL: i32 = 5;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

impl CommentId {
    pub fn stub() -> CommentId {
        CommentId(STUB_UUID)
    }
}

/// A comment row, as persisted by the backing store
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub content: String,
    pub author_id: UserId,

    pub workspace_id: WorkspaceId,
    pub entity_type: EntityType,
    pub entity_id: EntityId,

    /// None for root comments
    pub parent_id: Option<CommentId>,
    pub thread_level: i32,

    /// Set on first edit, never reset
    pub is_edited: bool,
    pub mentions: Vec<String>,

    pub created_at: Time,
    /// Only changes on edit
    pub updated_at: Time,
}

impl Comment {
    pub fn thread(&self) -> ThreadKey {
        ThreadKey::new(self.workspace_id, self.entity_type, self.entity_id)
    }
}

/// Row submitted to the store on comment creation; the store assigns the id
/// and the timestamps
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewCommentRow {
    pub author_id: UserId,
    pub workspace_id: WorkspaceId,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub content: String,
    pub parent_id: Option<CommentId>,
    pub thread_level: i32,
    pub mentions: Vec<String>,
}

impl NewCommentRow {
    pub fn thread(&self) -> ThreadKey {
        ThreadKey::new(self.workspace_id, self.entity_type, self.entity_id)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentUpdate {
    pub author_id: UserId,
    pub content: String,
    pub mentions: Vec<String>,
}

pub fn child_thread_level(parent_level: i32) -> i32 {
    parent_level.saturating_add(1).clamp(0, MAX_THREAD_LEVEL)
}

/// Trims `content`, rejecting it if nothing remains
pub fn normalize_content(content: &str) -> Result<String, Error> {
    let content = content.trim();
    if content.is_empty() {
        return Err(Error::InvalidInput(String::from(
            "comment content is empty",
        )));
    }
    crate::validate_string(content)?;
    Ok(String::from(content))
}

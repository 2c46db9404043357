use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod comment;
pub use comment::{
    child_thread_level, normalize_content, Comment, CommentId, CommentUpdate, NewCommentRow,
    MAX_THREAD_LEVEL,
};

mod db;
pub use db::Backend;

mod error;
pub use error::Error;

mod feed;
pub use feed::{
    Broadcast, ChangeKind, Feed, FeedMessage, FeedRequest, RowChange, Subscription, TypingSignal,
};

mod reaction;
pub use reaction::{Reaction, ReactionType};

mod thread;
pub use thread::{EntityId, EntityType, ThreadKey, WorkspaceId};

mod user;
pub use user::{AuthToken, Session, UserId};

// Strings with NUL bytes cannot be stored by the backing database, so reject
// them as early as possible
pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::InvalidInput(format!(
            "null byte in string is not allowed {s:?}"
        )));
    }
    Ok(())
}

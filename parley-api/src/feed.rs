use async_trait::async_trait;
use futures::{channel::mpsc, stream::BoxStream};

use crate::{CommentId, EntityId, Error, Reaction, ThreadKey, UserId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row change notification emitted by the backing store
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum RowChange {
    Comment {
        kind: ChangeKind,
        id: CommentId,
        entity_id: EntityId,
    },
    /// Carries the whole row, old row for deletions
    Reaction { kind: ChangeKind, row: Reaction },
}

/// The one ephemeral payload exchanged over a thread's broadcast channel
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TypingSignal {
    pub user_id: UserId,
    pub display_name: String,
    pub is_typing: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type")]
pub enum Broadcast {
    #[serde(rename = "typing")]
    Typing(TypingSignal),
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedMessage {
    Pong,
    Change(RowChange),
    Broadcast(Broadcast),
}

/// Sent by a client over an authenticated feed connection
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedRequest {
    Subscribe(ThreadKey),
    Broadcast(Broadcast),
}

pub struct Subscription {
    /// Ends when the connection is lost
    pub incoming: BoxStream<'static, FeedMessage>,

    /// Fire-and-forget, delivered to the other subscribers of the channel
    pub outgoing: mpsc::UnboundedSender<Broadcast>,
}

/// Realtime transport: change notifications and broadcasts for one thread
#[async_trait]
pub trait Feed: Send + Sync {
    async fn subscribe(&self, thread: &ThreadKey) -> Result<Subscription, Error>;
}

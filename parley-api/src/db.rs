use async_trait::async_trait;

use crate::{
    Comment, CommentId, CommentUpdate, Error, NewCommentRow, Reaction, ThreadKey, UserId,
};

/// Row-level access to the backing store, on behalf of an authenticated user
///
/// Implementors enforce authorship themselves: writes whose author is not
/// the authenticated user fail with `Error::Forbidden`, and reading a thread
/// the user cannot see fails with `Error::NotAuthorized`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Sorted by ascending creation date
    async fn select_comments(&self, thread: &ThreadKey) -> Result<Vec<Comment>, Error>;
    async fn select_comment(&self, id: CommentId) -> Result<Option<Comment>, Error>;
    async fn insert_comment(&self, row: NewCommentRow) -> Result<Comment, Error>;
    async fn update_comment(&self, id: CommentId, update: CommentUpdate) -> Result<(), Error>;
    async fn delete_comment(&self, id: CommentId, author: UserId) -> Result<(), Error>;

    async fn select_reactions(&self, comments: &[CommentId]) -> Result<Vec<Reaction>, Error>;
    async fn insert_reaction(&self, row: Reaction) -> Result<(), Error>;
    /// Succeeds even if there was no such reaction
    async fn delete_reaction(&self, comment: CommentId, user: UserId) -> Result<(), Error>;
}

use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    api::{
        child_thread_level, normalize_content, Backend, Comment, CommentId, CommentUpdate, Error,
        NewCommentRow, Reaction, ReactionType, ThreadKey, UserId, WorkspaceId,
    },
    extract_mentions,
};

/// The only component talking to persistence
///
/// Every call is bounded by `timeout`, expiring with `Error::Unavailable`.
/// Dropping a returned future cancels the call.
#[derive(Clone)]
pub struct StoreClient {
    backend: Arc<dyn Backend>,
    timeout: Duration,
}

impl StoreClient {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration) -> StoreClient {
        StoreClient { backend, timeout }
    }

    async fn call<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                tracing::debug!(what, timeout = ?self.timeout, "store call timed out");
                Err(Error::Unavailable(format!(
                    "{what} timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    async fn existing_comment(&self, id: CommentId) -> Result<Comment, Error> {
        self.call("fetching comment", self.backend.select_comment(id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("comment {:?}", id.0)))
    }

    /// Comments of `thread`, by ascending creation date
    pub async fn fetch_thread(&self, thread: &ThreadKey) -> Result<Vec<Comment>, Error> {
        let comments = self
            .call("fetching thread", self.backend.select_comments(thread))
            .await?;
        if comments.windows(2).any(|w| w[0].created_at > w[1].created_at) {
            tracing::warn!(?thread, "store returned comments out of creation order");
        }
        Ok(comments)
    }

    pub async fn fetch_reactions(&self, comments: &[CommentId]) -> Result<Vec<Reaction>, Error> {
        if comments.is_empty() {
            return Ok(Vec::new());
        }
        self.call("fetching reactions", self.backend.select_reactions(comments))
            .await
    }

    pub async fn create_comment(
        &self,
        author: UserId,
        thread: &ThreadKey,
        content: &str,
        parent_id: Option<CommentId>,
    ) -> Result<Comment, Error> {
        let content = normalize_content(content)?;
        let thread_level = match parent_id {
            None => 0,
            Some(parent_id) => {
                let parent = self.existing_comment(parent_id).await?;
                if parent.thread() != *thread {
                    return Err(Error::NotFound(format!(
                        "parent comment {:?} in this thread",
                        parent_id.0
                    )));
                }
                child_thread_level(parent.thread_level)
            }
        };
        let row = NewCommentRow {
            author_id: author,
            workspace_id: thread.workspace_id,
            entity_type: thread.entity_type,
            entity_id: thread.entity_id,
            mentions: extract_mentions(&content),
            content,
            parent_id,
            thread_level,
        };
        self.call("creating comment", self.backend.insert_comment(row))
            .await
    }

    /// Marks the comment edited even if `content` is unchanged
    pub async fn update_comment(
        &self,
        id: CommentId,
        author: UserId,
        content: &str,
    ) -> Result<(), Error> {
        let content = normalize_content(content)?;
        let current = self.existing_comment(id).await?;
        if current.author_id != author {
            return Err(Error::Forbidden);
        }
        let update = CommentUpdate {
            author_id: author,
            mentions: extract_mentions(&content),
            content,
        };
        self.call("updating comment", self.backend.update_comment(id, update))
            .await
    }

    /// Replies are left in place
    pub async fn delete_comment(&self, id: CommentId, author: UserId) -> Result<(), Error> {
        let current = self.existing_comment(id).await?;
        if current.author_id != author {
            return Err(Error::Forbidden);
        }
        self.call("deleting comment", self.backend.delete_comment(id, author))
            .await
    }

    /// Replaces any previous reaction of `user` on `comment`
    pub async fn set_reaction(
        &self,
        comment: CommentId,
        user: UserId,
        workspace: WorkspaceId,
        kind: ReactionType,
    ) -> Result<(), Error> {
        self.existing_comment(comment).await?;
        self.call(
            "clearing previous reaction",
            self.backend.delete_reaction(comment, user),
        )
        .await?;
        self.call(
            "adding reaction",
            self.backend.insert_reaction(Reaction {
                comment_id: comment,
                user_id: user,
                workspace_id: workspace,
                reaction_type: kind,
            }),
        )
        .await
    }

    pub async fn clear_reaction(&self, comment: CommentId, user: UserId) -> Result<(), Error> {
        self.call("clearing reaction", self.backend.delete_reaction(comment, user))
            .await
    }
}

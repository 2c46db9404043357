use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    api::{
        Backend, Broadcast, Comment, CommentId, Error, Feed, ReactionType, Session, ThreadKey,
        TypingSignal,
    },
    CommentNode, Snapshot, StoreClient, SyncConfig, SyncHandle, SyncManager, SyncState,
    ThreadView, TypingTracker,
};

/// One open view of a discussion thread
///
/// Mutations go straight to the store and are only reflected in the tree
/// once the change comes back through reconciliation. A failed mutation
/// leaves local state untouched.
///
/// Several controllers on the same thread share nothing but the store and
/// its change feed.
pub struct CommentThread {
    session: Session,
    key: ThreadKey,
    store: StoreClient,
    sync: SyncHandle,
    typing: TypingTracker,
}

fn logged<T>(op: &'static str, res: Result<T, Error>) -> Result<T, Error> {
    if let Err(err) = &res {
        tracing::info!(op, ?err, "comment operation failed");
    }
    res
}

impl CommentThread {
    /// Fetches the thread and starts following its changes
    ///
    /// Fails if the initial fetch does, notably with `Error::NotAuthorized`
    /// when `session` cannot read the thread.
    pub async fn load(
        session: Session,
        key: ThreadKey,
        backend: Arc<dyn Backend>,
        feed: Arc<dyn Feed>,
        config: SyncConfig,
    ) -> Result<CommentThread, Error> {
        let store = StoreClient::new(backend, config.store_timeout);
        let initial = logged(
            "load",
            Snapshot::fetch(&store, &key, session.user_id).await,
        )?;
        tracing::info!(
            thread = ?key,
            num_comments = initial.comments.len(),
            "loaded comment thread"
        );
        let typing = TypingTracker::spawn(session.user_id, config.typing_ttl);
        let sync = SyncManager::spawn(store.clone(), feed, key, initial, typing.sink(), config);
        Ok(CommentThread {
            session,
            key,
            store,
            sync,
            typing,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn key(&self) -> &ThreadKey {
        &self.key
    }

    pub fn view(&self) -> watch::Receiver<ThreadView> {
        self.sync.view()
    }

    /// Root comments as of the last reconciliation
    pub fn tree(&self) -> Arc<Vec<CommentNode>> {
        self.sync.view().borrow().tree.clone()
    }

    pub fn sync_state(&self) -> watch::Receiver<SyncState> {
        self.sync.state()
    }

    pub async fn add_comment(
        &self,
        content: &str,
        parent: Option<CommentId>,
    ) -> Result<Comment, Error> {
        logged(
            "add comment",
            self.store
                .create_comment(self.session.user_id, &self.key, content, parent)
                .await,
        )
    }

    pub async fn edit_comment(&self, id: CommentId, content: &str) -> Result<(), Error> {
        logged(
            "edit comment",
            self.store
                .update_comment(id, self.session.user_id, content)
                .await,
        )
    }

    pub async fn delete_comment(&self, id: CommentId) -> Result<(), Error> {
        logged(
            "delete comment",
            self.store.delete_comment(id, self.session.user_id).await,
        )
    }

    pub async fn react(&self, id: CommentId, kind: ReactionType) -> Result<(), Error> {
        logged(
            "react",
            self.store
                .set_reaction(id, self.session.user_id, self.key.workspace_id, kind)
                .await,
        )
    }

    pub async fn unreact(&self, id: CommentId) -> Result<(), Error> {
        logged(
            "unreact",
            self.store.clear_reaction(id, self.session.user_id).await,
        )
    }

    /// Fire-and-forget
    pub fn broadcast_typing(&self, is_typing: bool) {
        self.sync.broadcast(Broadcast::Typing(TypingSignal {
            user_id: self.session.user_id,
            display_name: self.session.display_name.clone(),
            is_typing,
        }))
    }

    /// Display names of the other users currently typing
    pub fn typing_users(&self) -> Vec<String> {
        self.typing.typing_users()
    }

    pub fn watch_typing(&self) -> watch::Receiver<Vec<String>> {
        self.typing.watch()
    }

    pub fn reload(&self) {
        self.sync.reload()
    }

    /// Stops following the thread; dropping the controller does the same
    /// without waiting
    pub async fn close(self) {
        let CommentThread { sync, typing, .. } = self;
        sync.close().await;
        drop(typing);
        tracing::debug!("closed comment thread");
    }
}

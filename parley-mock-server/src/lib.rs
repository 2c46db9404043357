use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::Utc;
use futures::{channel::mpsc, StreamExt};
use parley_api::{
    Backend, Broadcast, ChangeKind, Comment, CommentId, CommentUpdate, Error, Feed, FeedMessage,
    NewCommentRow, Reaction, RowChange, Subscription, ThreadKey, Time, UserId, Uuid,
};
use tokio::sync::watch;

/// In-memory store and change feed, with knobs to inject faults
///
/// Clones share the same state.
#[derive(Clone)]
pub struct MockServer {
    state: Arc<Mutex<State>>,
    // true while fetches are held
    gate: Arc<watch::Sender<bool>>,
}

#[derive(Default)]
struct State {
    comments: Vec<Comment>,
    reactions: Vec<Reaction>,
    last_time: Option<Time>,

    denied_readers: HashSet<UserId>,
    unavailable: bool,
    failing_fetches: usize,
    failing_subscriptions: usize,

    fetches: usize,
    subscriptions: usize,
    next_feed_id: usize,
    feeds: Vec<FeedClient>,
}

struct FeedClient {
    id: usize,
    thread: ThreadKey,
    sender: mpsc::UnboundedSender<FeedMessage>,
}

impl State {
    fn check_available(&self) -> Result<(), Error> {
        match self.unavailable {
            true => Err(Error::Unavailable(String::from("mock server is down"))),
            false => Ok(()),
        }
    }

    /// Strictly increasing, so that creation order is total
    fn now(&mut self) -> Time {
        let mut now = Utc::now();
        if let Some(last) = self.last_time {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        self.last_time = Some(now);
        now
    }

    fn comment_mut(&mut self, id: CommentId) -> Result<&mut Comment, Error> {
        self.comments
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::NotFound(format!("comment {:?}", id.0)))
    }

    fn relay<F>(&mut self, msg: FeedMessage, mut to: F)
    where
        F: FnMut(&FeedClient) -> bool,
    {
        self.feeds.retain_mut(|f| {
            !to(f) || matches!(f.sender.unbounded_send(msg.clone()), Ok(()))
        });
    }

    fn comment_changed(&mut self, kind: ChangeKind, c: &Comment) {
        let change = RowChange::Comment {
            kind,
            id: c.id,
            entity_id: c.entity_id,
        };
        let entity_id = c.entity_id;
        self.relay(FeedMessage::Change(change), |f| {
            f.thread.entity_id == entity_id
        });
    }

    // reaction rows carry no entity, so every subscriber gets them
    fn reaction_changed(&mut self, kind: ChangeKind, row: Reaction) {
        self.relay(FeedMessage::Change(RowChange::Reaction { kind, row }), |_| true);
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        let (gate, _) = watch::channel(false);
        MockServer {
            state: Arc::new(Mutex::new(State::default())),
            gate: Arc::new(gate),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("mock server state is poisoned")
    }

    /// A store connection authenticated as `user`
    pub fn backend_for(&self, user: UserId) -> MockBackend {
        MockBackend {
            server: self.clone(),
            user,
        }
    }

    pub fn feed_for(&self, user: UserId) -> MockFeed {
        MockFeed {
            server: self.clone(),
            user,
        }
    }

    pub fn deny_read(&self, user: UserId) {
        self.state().denied_readers.insert(user);
    }

    /// Makes every call fail with `Error::Unavailable` until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn fail_next_fetches(&self, n: usize) {
        self.state().failing_fetches = n;
    }

    pub fn fail_next_subscriptions(&self, n: usize) {
        self.state().failing_subscriptions = n;
    }

    /// Thread fetches started from now on block until `release_fetches`
    pub fn hold_fetches(&self) {
        self.gate.send_replace(true);
    }

    pub fn release_fetches(&self) {
        self.gate.send_replace(false);
    }

    /// Number of thread fetches started so far, held ones included
    pub fn fetch_count(&self) -> usize {
        self.state().fetches
    }

    pub fn subscribe_count(&self) -> usize {
        self.state().subscriptions
    }

    /// Number of live feed connections
    pub fn feed_count(&self) -> usize {
        let mut state = self.state();
        state.feeds.retain(|f| !f.sender.is_closed());
        state.feeds.len()
    }

    /// Drops every feed connection, as a network outage would
    pub fn disconnect_all(&self) {
        let dropped = std::mem::take(&mut self.state().feeds);
        tracing::debug!(num_feeds = dropped.len(), "mock server dropping all feeds");
    }

    pub fn comments(&self) -> Vec<Comment> {
        self.state().comments.clone()
    }

    pub fn reactions(&self) -> Vec<Reaction> {
        self.state().reactions.clone()
    }

    fn relay_broadcast(&self, from: usize, thread: ThreadKey, msg: Broadcast) {
        let channel = thread.channel_name();
        self.state()
            .relay(FeedMessage::Broadcast(msg), |f| {
                f.id != from && f.thread.channel_name() == channel
            });
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

pub struct MockBackend {
    server: MockServer,
    user: UserId,
}

impl MockBackend {
    fn check_author(&self, author: UserId) -> Result<(), Error> {
        match author == self.user {
            true => Ok(()),
            false => Err(Error::Forbidden),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn select_comments(&self, thread: &ThreadKey) -> Result<Vec<Comment>, Error> {
        self.server.state().fetches += 1;
        let mut gate = self.server.gate.subscribe();
        if gate.wait_for(|held| !held).await.is_err() {
            return Err(Error::Unavailable(String::from("mock server is gone")));
        }

        let mut state = self.server.state();
        state.check_available()?;
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(Error::Unavailable(String::from("injected fetch failure")));
        }
        if state.denied_readers.contains(&self.user) {
            return Err(Error::NotAuthorized);
        }
        Ok(state
            .comments
            .iter()
            .filter(|c| c.thread() == *thread)
            .cloned()
            .collect())
    }

    async fn select_comment(&self, id: CommentId) -> Result<Option<Comment>, Error> {
        let state = self.server.state();
        state.check_available()?;
        Ok(state.comments.iter().find(|c| c.id == id).cloned())
    }

    async fn insert_comment(&self, row: NewCommentRow) -> Result<Comment, Error> {
        self.check_author(row.author_id)?;
        let mut state = self.server.state();
        state.check_available()?;
        if let Some(parent) = row.parent_id {
            state.comment_mut(parent)?;
        }
        let now = state.now();
        let comment = Comment {
            id: CommentId(Uuid::new_v4()),
            content: row.content,
            author_id: row.author_id,
            workspace_id: row.workspace_id,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            parent_id: row.parent_id,
            thread_level: row.thread_level,
            is_edited: false,
            mentions: row.mentions,
            created_at: now,
            updated_at: now,
        };
        state.comments.push(comment.clone());
        state.comment_changed(ChangeKind::Insert, &comment);
        Ok(comment)
    }

    async fn update_comment(&self, id: CommentId, update: CommentUpdate) -> Result<(), Error> {
        self.check_author(update.author_id)?;
        let mut state = self.server.state();
        state.check_available()?;
        let now = state.now();
        let c = state.comment_mut(id)?;
        if c.author_id != update.author_id {
            return Err(Error::Forbidden);
        }
        c.content = update.content;
        c.mentions = update.mentions;
        c.is_edited = true;
        c.updated_at = now;
        let c = c.clone();
        state.comment_changed(ChangeKind::Update, &c);
        Ok(())
    }

    async fn delete_comment(&self, id: CommentId, author: UserId) -> Result<(), Error> {
        self.check_author(author)?;
        let mut state = self.server.state();
        state.check_available()?;
        if state.comment_mut(id)?.author_id != author {
            return Err(Error::Forbidden);
        }
        let pos = state
            .comments
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| Error::NotFound(format!("comment {:?}", id.0)))?;
        let c = state.comments.remove(pos);
        // replies stay, reactions go with their comment
        state.reactions.retain(|r| r.comment_id != id);
        state.comment_changed(ChangeKind::Delete, &c);
        Ok(())
    }

    async fn select_reactions(&self, comments: &[CommentId]) -> Result<Vec<Reaction>, Error> {
        let state = self.server.state();
        state.check_available()?;
        Ok(state
            .reactions
            .iter()
            .filter(|r| comments.contains(&r.comment_id))
            .cloned()
            .collect())
    }

    async fn insert_reaction(&self, row: Reaction) -> Result<(), Error> {
        self.check_author(row.user_id)?;
        let mut state = self.server.state();
        state.check_available()?;
        state.comment_mut(row.comment_id)?;
        let existing = state
            .reactions
            .iter()
            .position(|r| r.comment_id == row.comment_id && r.user_id == row.user_id);
        match existing {
            Some(pos) => {
                state.reactions[pos].reaction_type = row.reaction_type;
                state.reaction_changed(ChangeKind::Update, row);
            }
            None => {
                state.reactions.push(row.clone());
                state.reaction_changed(ChangeKind::Insert, row);
            }
        }
        Ok(())
    }

    async fn delete_reaction(&self, comment: CommentId, user: UserId) -> Result<(), Error> {
        self.check_author(user)?;
        let mut state = self.server.state();
        state.check_available()?;
        if let Some(pos) = state
            .reactions
            .iter()
            .position(|r| r.comment_id == comment && r.user_id == user)
        {
            let row = state.reactions.remove(pos);
            state.reaction_changed(ChangeKind::Delete, row);
        }
        Ok(())
    }
}

pub struct MockFeed {
    server: MockServer,
    user: UserId,
}

#[async_trait]
impl Feed for MockFeed {
    async fn subscribe(&self, thread: &ThreadKey) -> Result<Subscription, Error> {
        let (incoming_tx, incoming) = mpsc::unbounded();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded();
        let id = {
            let mut state = self.server.state();
            state.check_available()?;
            if state.failing_subscriptions > 0 {
                state.failing_subscriptions -= 1;
                return Err(Error::Unavailable(String::from(
                    "injected subscription failure",
                )));
            }
            if state.denied_readers.contains(&self.user) {
                return Err(Error::NotAuthorized);
            }
            state.subscriptions += 1;
            let id = state.next_feed_id;
            state.next_feed_id += 1;
            state.feeds.push(FeedClient {
                id,
                thread: *thread,
                sender: incoming_tx,
            });
            id
        };

        let server = self.server.clone();
        let thread = *thread;
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.next().await {
                server.relay_broadcast(id, thread, msg);
            }
        });

        Ok(Subscription {
            incoming: incoming.boxed(),
            outgoing,
        })
    }
}

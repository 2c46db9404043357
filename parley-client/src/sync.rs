use std::sync::Arc;

use futures::{
    channel::mpsc,
    future::{BoxFuture, Fuse, FusedFuture},
    pin_mut, select, FutureExt, StreamExt,
};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    api::{
        Broadcast, Comment, Error, Feed, FeedMessage, RowChange, Subscription, ThreadKey,
        TypingSignal, UserId,
    },
    build_tree, CommentNode, ReactionAggregator, StoreClient, SyncConfig,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncState {
    /// Waiting for the change feed, either initially or after losing it
    Connecting,
    Subscribed,
    /// A full refetch is in flight
    Reconciling,
    Closed,
}

/// The last reconciled state of a thread
#[derive(Clone, Debug, Default)]
pub struct ThreadView {
    /// Root comments
    pub tree: Arc<Vec<CommentNode>>,

    /// Bumped on every republish
    pub revision: u64,
}

/// Everything fetched in one reconciliation pass
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// By ascending creation date
    pub comments: Vec<Comment>,
    pub reactions: ReactionAggregator,
}

impl Snapshot {
    pub async fn fetch(
        store: &StoreClient,
        thread: &ThreadKey,
        viewer: UserId,
    ) -> Result<Snapshot, Error> {
        let comments = store.fetch_thread(thread).await?;
        let ids = comments.iter().map(|c| c.id).collect::<Vec<_>>();
        let reactions = store.fetch_reactions(&ids).await?;
        Ok(Snapshot {
            reactions: ReactionAggregator::aggregate(viewer, ids, reactions),
            comments,
        })
    }

    pub fn tree(&self) -> Vec<CommentNode> {
        build_tree(
            self.comments
                .iter()
                .map(|c| CommentNode::new(c.clone(), self.reactions.summary(&c.id)))
                .collect(),
        )
    }
}

#[derive(Debug)]
enum Command {
    Reload,
    Broadcast(Broadcast),
    Close,
}

/// Owner side of a running sync task
///
/// Dropping the handle stops the task at its next wakeup.
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<ThreadView>,
    state: watch::Receiver<SyncState>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn view(&self) -> watch::Receiver<ThreadView> {
        self.view.clone()
    }

    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    fn send(&self, cmd: Command) {
        if let Err(err) = self.commands.unbounded_send(cmd) {
            tracing::debug!(cmd = ?err.into_inner(), "sync task is already stopped");
        }
    }

    /// Requests a reconciliation, coalesced with any already pending
    pub fn reload(&self) {
        self.send(Command::Reload)
    }

    /// Fire-and-forget, dropped while disconnected
    pub fn broadcast(&self, msg: Broadcast) {
        self.send(Command::Broadcast(msg))
    }

    pub async fn close(self) {
        self.send(Command::Close);
        if let Err(err) = self.task.await {
            tracing::error!(?err, "sync task did not terminate cleanly");
        }
    }
}

type Reconciliation = Fuse<BoxFuture<'static, Result<Snapshot, Error>>>;

/// Keeps one thread's view in line with the store, driven by its change feed
pub struct SyncManager {
    store: StoreClient,
    feed: Arc<dyn Feed>,
    thread: ThreadKey,
    config: SyncConfig,
    typing: mpsc::UnboundedSender<TypingSignal>,
    snapshot: Snapshot,
    view: watch::Sender<ThreadView>,
    state: watch::Sender<SyncState>,
}

impl SyncManager {
    /// Publishes `initial` as revision 1, then subscribes to the feed
    ///
    /// Typing broadcasts received from the feed are forwarded to `typing`.
    pub fn spawn(
        store: StoreClient,
        feed: Arc<dyn Feed>,
        thread: ThreadKey,
        initial: Snapshot,
        typing: mpsc::UnboundedSender<TypingSignal>,
        config: SyncConfig,
    ) -> SyncHandle {
        let (commands, commands_rx) = mpsc::unbounded();
        let (view_tx, view) = watch::channel(ThreadView {
            tree: Arc::new(initial.tree()),
            revision: 1,
        });
        let (state_tx, state) = watch::channel(SyncState::Connecting);
        let manager = SyncManager {
            store,
            feed,
            thread,
            config,
            typing,
            snapshot: initial,
            view: view_tx,
            state: state_tx,
        };
        let task = tokio::spawn(manager.run(commands_rx));
        SyncHandle {
            commands,
            view,
            state,
            task,
        }
    }

    fn set_state(&self, state: SyncState) {
        let changed = self.state.send_if_modified(|s| {
            if *s == state {
                return false;
            }
            *s = state;
            true
        });
        if changed {
            tracing::debug!(thread = ?self.thread, ?state, "sync state changed");
        }
    }

    fn publish(&self) {
        let tree = Arc::new(self.snapshot.tree());
        self.view.send_modify(|v| {
            v.tree = tree;
            v.revision += 1;
        });
    }

    fn start_reconciliation(&self) -> Reconciliation {
        let store = self.store.clone();
        let thread = self.thread;
        let viewer = self.snapshot.reactions.viewer();
        async move { Snapshot::fetch(&store, &thread, viewer).await }
            .boxed()
            .fuse()
    }

    fn reconciled(&mut self, res: Result<Snapshot, Error>) {
        match res {
            Ok(snapshot) => {
                tracing::debug!(
                    thread = ?self.thread,
                    num_comments = snapshot.comments.len(),
                    "reconciled thread"
                );
                self.snapshot = snapshot;
                self.publish();
            }
            // keep serving the previous tree, the next notification or reload retries
            Err(err) => tracing::warn!(thread = ?self.thread, ?err, "failed reconciling thread"),
        }
    }

    /// Returns whether a full reconciliation is needed
    fn handle_change(&mut self, change: RowChange, reconciling: bool) -> bool {
        match change {
            RowChange::Comment { id, entity_id, .. } if entity_id != self.thread.entity_id => {
                tracing::trace!(?id, ?entity_id, "ignoring comment change from another thread");
                false
            }
            RowChange::Comment { .. } => true,
            RowChange::Reaction { row, .. } if row.workspace_id != self.thread.workspace_id => {
                false
            }
            // the in-flight fetch may or may not include this row, new comments
            // reconcile through their own change
            RowChange::Reaction { row, .. } if reconciling => {
                self.snapshot.reactions.knows(&row.comment_id)
            }
            RowChange::Reaction { kind, row } => {
                if self.snapshot.reactions.apply(kind, &row) {
                    self.publish();
                }
                false
            }
        }
    }

    fn handle_message(&mut self, msg: FeedMessage, reconciling: bool) -> bool {
        match msg {
            FeedMessage::Pong => false,
            FeedMessage::Change(change) => self.handle_change(change, reconciling),
            FeedMessage::Broadcast(Broadcast::Typing(signal)) => {
                if self.typing.unbounded_send(signal).is_err() {
                    tracing::trace!("typing tracker is gone, dropping signal");
                }
                false
            }
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut backoff = self.config.initial_backoff;
        let mut first_attempt = true;
        'reconnect: loop {
            self.set_state(SyncState::Connecting);
            match first_attempt {
                true => first_attempt = false,
                false => {
                    let delay = tokio::time::sleep(backoff).fuse();
                    pin_mut!(delay);
                    loop {
                        select! {
                            _ = delay => break,
                            cmd = commands.next() => match cmd {
                                None | Some(Command::Close) => break 'reconnect,
                                Some(Command::Reload) => (),
                                Some(Command::Broadcast(msg)) => {
                                    tracing::trace!(?msg, "dropping broadcast while disconnected")
                                }
                            },
                        }
                    }
                }
            }

            let subscription = {
                let subscribe = self.feed.subscribe(&self.thread).fuse();
                pin_mut!(subscribe);
                loop {
                    select! {
                        res = subscribe => break res,
                        cmd = commands.next() => match cmd {
                            None | Some(Command::Close) => break 'reconnect,
                            Some(Command::Reload) => (),
                            Some(Command::Broadcast(msg)) => {
                                tracing::trace!(?msg, "dropping broadcast while connecting")
                            }
                        },
                    }
                }
            };
            let Subscription { incoming, outgoing } = match subscription {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(
                        thread = ?self.thread,
                        ?err,
                        ?backoff,
                        "failed subscribing to thread feed"
                    );
                    backoff = self.config.next_backoff(backoff);
                    continue 'reconnect;
                }
            };
            backoff = self.config.initial_backoff;
            tracing::info!(channel = %self.thread.channel_name(), "subscribed to thread feed");
            self.set_state(SyncState::Subscribed);

            let mut incoming = incoming.fuse();
            let mut reconciliation: Reconciliation = Fuse::terminated();
            // changes may have been missed while not subscribed
            let mut pending = true;
            loop {
                if pending && reconciliation.is_terminated() {
                    pending = false;
                    reconciliation = self.start_reconciliation();
                    self.set_state(SyncState::Reconciling);
                }
                select! {
                    res = reconciliation => {
                        self.reconciled(res);
                        if !pending {
                            self.set_state(SyncState::Subscribed);
                        }
                    }
                    msg = incoming.next() => match msg {
                        None => {
                            tracing::warn!(thread = ?self.thread, "lost thread feed connection");
                            continue 'reconnect;
                        }
                        Some(msg) => {
                            tracing::trace!(?msg, "received feed message");
                            let reconciling = !reconciliation.is_terminated();
                            pending |= self.handle_message(msg, reconciling);
                        }
                    },
                    cmd = commands.next() => match cmd {
                        None | Some(Command::Close) => break 'reconnect,
                        Some(Command::Reload) => pending = true,
                        Some(Command::Broadcast(msg)) => {
                            if outgoing.unbounded_send(msg).is_err() {
                                tracing::debug!("feed connection closed, dropping broadcast");
                            }
                        }
                    },
                }
            }
        }
        self.set_state(SyncState::Closed);
        tracing::debug!(thread = ?self.thread, "sync task stopped");
    }
}

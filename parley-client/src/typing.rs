use std::{collections::HashMap, time::Duration};

use futures::{channel::mpsc, select, StreamExt};
use tokio::{sync::watch, task::JoinHandle};

use crate::api::{TypingSignal, UserId};

/// Who is currently typing in a thread, apart from the viewer
///
/// Signals are processed by a single task that owns the per-user timers.
/// Dropping the tracker stops that task and cancels all timers.
pub struct TypingTracker {
    signals: mpsc::UnboundedSender<TypingSignal>,
    users: watch::Receiver<Vec<String>>,
    task: JoinHandle<()>,
}

impl TypingTracker {
    pub fn spawn(viewer: UserId, ttl: Duration) -> TypingTracker {
        let (signals, signals_rx) = mpsc::unbounded();
        let (users_tx, users) = watch::channel(Vec::new());
        let task = tokio::spawn(run(viewer, ttl, signals_rx, users_tx));
        TypingTracker {
            signals,
            users,
            task,
        }
    }

    pub fn signal(&self, signal: TypingSignal) {
        if self.signals.unbounded_send(signal).is_err() {
            tracing::debug!("typing tracker is already stopped");
        }
    }

    /// A handle other tasks can feed signals through
    pub fn sink(&self) -> mpsc::UnboundedSender<TypingSignal> {
        self.signals.clone()
    }

    /// Display names, in the order the users started typing
    pub fn typing_users(&self) -> Vec<String> {
        self.users.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<String>> {
        self.users.clone()
    }
}

impl Drop for TypingTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Typist {
    display_name: String,
    started: u64,
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct Typists {
    users: HashMap<UserId, Typist>,
    next_generation: u64,
    next_start: u64,
}

impl Typists {
    fn typing(
        &mut self,
        user: UserId,
        display_name: String,
        ttl: Duration,
        expirations: &mpsc::UnboundedSender<(UserId, u64)>,
    ) {
        let generation = self.next_generation;
        self.next_generation += 1;
        let expirations = expirations.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            // the tracker may have stopped in the meantime
            let _ = expirations.unbounded_send((user, generation));
        });
        match self.users.get_mut(&user) {
            Some(t) => {
                t.timer.abort();
                t.timer = timer;
                t.generation = generation;
                t.display_name = display_name;
            }
            None => {
                let started = self.next_start;
                self.next_start += 1;
                self.users.insert(
                    user,
                    Typist {
                        display_name,
                        started,
                        generation,
                        timer,
                    },
                );
            }
        }
    }

    fn stopped(&mut self, user: &UserId) {
        if let Some(t) = self.users.remove(user) {
            t.timer.abort();
        }
    }

    fn expired(&mut self, user: UserId, generation: u64) {
        // an aborted timer may still have fired just before being refreshed
        if self.users.get(&user).map(|t| t.generation) == Some(generation) {
            tracing::trace!(?user, "typing indicator expired");
            self.users.remove(&user);
        }
    }

    fn names(&self) -> Vec<String> {
        let mut typists = self.users.values().collect::<Vec<_>>();
        typists.sort_by_key(|t| t.started);
        typists.into_iter().map(|t| t.display_name.clone()).collect()
    }
}

impl Drop for Typists {
    fn drop(&mut self) {
        for t in self.users.values() {
            t.timer.abort();
        }
    }
}

async fn run(
    viewer: UserId,
    ttl: Duration,
    mut signals: mpsc::UnboundedReceiver<TypingSignal>,
    users: watch::Sender<Vec<String>>,
) {
    let (expirations_tx, mut expirations) = mpsc::unbounded();
    let mut typists = Typists::default();
    loop {
        select! {
            signal = signals.next() => match signal {
                None => break,
                Some(signal) if signal.user_id == viewer => {
                    tracing::trace!("ignoring own typing signal");
                }
                Some(signal) if signal.is_typing => {
                    typists.typing(signal.user_id, signal.display_name, ttl, &expirations_tx);
                }
                Some(signal) => typists.stopped(&signal.user_id),
            },
            expired = expirations.next() => {
                if let Some((user, generation)) = expired {
                    typists.expired(user, generation);
                }
            }
        }
        let names = typists.names();
        users.send_if_modified(|current| {
            if *current == names {
                return false;
            }
            *current = names;
            true
        });
    }
}

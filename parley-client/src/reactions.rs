use std::collections::{BTreeMap, HashMap};

use crate::api::{ChangeKind, CommentId, Reaction, ReactionType, UserId};

/// Reactions on one comment, as seen by one viewer
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReactionSummary {
    /// Only kinds with a non-zero count are present
    pub counts: BTreeMap<ReactionType, u32>,

    /// The viewer's own reaction
    pub mine: Option<ReactionType>,
}

impl ReactionSummary {
    pub fn count(&self, kind: ReactionType) -> u32 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }
}

/// Per-comment reaction state for the comments currently held in memory
#[derive(Clone, Debug)]
pub struct ReactionAggregator {
    viewer: UserId,
    // at most one reaction per user and comment
    rows: HashMap<CommentId, HashMap<UserId, ReactionType>>,
    summaries: HashMap<CommentId, ReactionSummary>,
}

impl ReactionAggregator {
    pub fn new(viewer: UserId) -> ReactionAggregator {
        ReactionAggregator {
            viewer,
            rows: HashMap::new(),
            summaries: HashMap::new(),
        }
    }

    /// Builds the state for `comments` from all their reaction rows
    ///
    /// Rows for comments not listed are ignored.
    pub fn aggregate<I>(viewer: UserId, comments: I, reactions: Vec<Reaction>) -> Self
    where
        I: IntoIterator<Item = CommentId>,
    {
        let mut rows = comments
            .into_iter()
            .map(|c| (c, HashMap::new()))
            .collect::<HashMap<CommentId, HashMap<UserId, ReactionType>>>();
        for r in reactions {
            match rows.get_mut(&r.comment_id) {
                Some(users) => {
                    users.insert(r.user_id, r.reaction_type);
                }
                None => tracing::trace!(?r, "ignoring reaction on comment not in batch"),
            }
        }
        let summaries = rows
            .iter()
            .map(|(c, users)| (*c, summarize(viewer, users)))
            .collect();
        ReactionAggregator {
            viewer,
            rows,
            summaries,
        }
    }

    pub fn viewer(&self) -> UserId {
        self.viewer
    }

    pub fn knows(&self, comment: &CommentId) -> bool {
        self.rows.contains_key(comment)
    }

    pub fn summary(&self, comment: &CommentId) -> ReactionSummary {
        self.summaries.get(comment).cloned().unwrap_or_default()
    }

    /// Applies a single row change, recomputing only the affected comment
    ///
    /// Returns whether anything changed. Changes on comments not currently
    /// held are dropped, the next full aggregation will pick them up.
    pub fn apply(&mut self, kind: ChangeKind, row: &Reaction) -> bool {
        let users = match self.rows.get_mut(&row.comment_id) {
            Some(users) => users,
            None => {
                tracing::trace!(?row, "ignoring reaction change on unknown comment");
                return false;
            }
        };
        let changed = match kind {
            ChangeKind::Insert | ChangeKind::Update => {
                users.insert(row.user_id, row.reaction_type) != Some(row.reaction_type)
            }
            ChangeKind::Delete => {
                // a stale deletion must not drop a newer reaction of another kind
                if users.get(&row.user_id) == Some(&row.reaction_type) {
                    users.remove(&row.user_id);
                    true
                } else {
                    false
                }
            }
        };
        if changed {
            let summary = summarize(self.viewer, users);
            self.summaries.insert(row.comment_id, summary);
        }
        changed
    }
}

fn summarize(viewer: UserId, users: &HashMap<UserId, ReactionType>) -> ReactionSummary {
    let mut counts = BTreeMap::new();
    for kind in users.values() {
        *counts.entry(*kind).or_insert(0) += 1;
    }
    ReactionSummary {
        counts,
        mine: users.get(&viewer).copied(),
    }
}

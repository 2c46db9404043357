mod config;
pub use config::SyncConfig;

mod http;
pub use http::HttpBackend;

mod mention;
pub use mention::extract_mentions;

mod reactions;
pub use reactions::{ReactionAggregator, ReactionSummary};

mod store;
pub use store::StoreClient;

mod sync;
pub use sync::{Snapshot, SyncHandle, SyncManager, SyncState, ThreadView};

mod thread;
pub use thread::CommentThread;

mod tree;
pub use tree::{build_tree, find_node, flatten, CommentNode};

mod typing;
pub use typing::TypingTracker;

mod ws;
pub use ws::WsFeed;

#[cfg(test)]
mod tests;

pub mod api {
    pub use parley_api::*;
}

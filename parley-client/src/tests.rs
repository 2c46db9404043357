#![cfg(test)]

use std::{sync::Arc, time::Duration};

use parley_mock_server::MockServer;
use tokio::sync::watch;

use crate::{
    api::{
        Backend, Comment, CommentId, EntityId, EntityType, Error, NewCommentRow, Reaction,
        ReactionType, Session, ThreadKey, UserId, Uuid, WorkspaceId,
    },
    flatten, CommentNode, CommentThread, SyncConfig, SyncState,
};

const PATIENCE: Duration = Duration::from_secs(5);

fn user(n: u8) -> UserId {
    UserId(Uuid::from_bytes([n; 16]))
}

fn session(n: u8) -> Session {
    Session::new(user(n), format!("user {n}"))
}

fn key() -> ThreadKey {
    ThreadKey::new(
        WorkspaceId(Uuid::from_bytes([0xAA; 16])),
        EntityType::Task,
        EntityId(Uuid::from_bytes([0xBB; 16])),
    )
}

fn config() -> SyncConfig {
    SyncConfig {
        store_timeout: Duration::from_secs(2),
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(200),
        ..SyncConfig::default()
    }
}

async fn load(server: &MockServer, n: u8, config: SyncConfig) -> Result<CommentThread, Error> {
    CommentThread::load(
        session(n),
        key(),
        Arc::new(server.backend_for(user(n))),
        Arc::new(server.feed_for(user(n))),
        config,
    )
    .await
}

async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, mut f: F)
where
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(PATIENCE, rx.wait_for(|v| f(v)))
        .await
        .expect("timed out waiting for watched value")
        .map(|_| ())
        .expect("watched value's sender is gone")
}

async fn poll_until<F: FnMut() -> bool>(mut f: F) {
    tokio::time::timeout(PATIENCE, async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out polling for condition")
}

/// Loads and waits until the post-subscription reconciliation is done
async fn open(server: &MockServer, n: u8) -> CommentThread {
    let thread = load(server, n, config()).await.expect("loading thread");
    wait_for(&mut thread.view(), |v| v.revision >= 2).await;
    wait_for(&mut thread.sync_state(), |s| *s == SyncState::Subscribed).await;
    thread
}

async fn wait_tree<F>(thread: &CommentThread, mut f: F)
where
    F: FnMut(&[CommentNode]) -> bool,
{
    wait_for(&mut thread.view(), |v| f(&v.tree)).await
}

/// Inserts a comment straight into the store, bypassing any controller
async fn raw_post(server: &MockServer, n: u8, content: &str) -> Comment {
    let k = key();
    server
        .backend_for(user(n))
        .insert_comment(NewCommentRow {
            author_id: user(n),
            workspace_id: k.workspace_id,
            entity_type: k.entity_type,
            entity_id: k.entity_id,
            content: String::from(content),
            parent_id: None,
            thread_level: 0,
            mentions: Vec::new(),
        })
        .await
        .expect("inserting comment")
}

fn ids(tree: &[CommentNode]) -> Vec<CommentId> {
    tree.iter().map(|n| n.comment.id).collect()
}

#[tokio::test]
async fn replies_nest_under_their_parent() {
    let server = MockServer::new();
    let thread = open(&server, 1).await;
    let a = thread.add_comment("A", None).await.unwrap();
    let b = thread.add_comment("B", Some(a.id)).await.unwrap();
    let c = thread.add_comment("C", Some(b.id)).await.unwrap();
    wait_tree(&thread, |t| flatten(t).len() == 3).await;

    let tree = thread.tree();
    assert_eq!(ids(&tree), vec![a.id]);
    assert_eq!(ids(&tree[0].replies), vec![b.id]);
    assert_eq!(ids(&tree[0].replies[0].replies), vec![c.id]);
    assert_eq!(
        flatten(&tree)
            .iter()
            .map(|n| n.comment.thread_level)
            .collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[tokio::test]
async fn deep_nesting_clamps_level() {
    let server = MockServer::new();
    let thread = open(&server, 1).await;
    let mut parent = None;
    for i in 0..11 {
        let c = thread
            .add_comment(&format!("level {i}"), parent)
            .await
            .unwrap();
        parent = Some(c.id);
    }
    assert_eq!(
        server
            .comments()
            .iter()
            .map(|c| c.thread_level)
            .collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4, 5, 5, 5, 5, 5, 5]
    );
    wait_tree(&thread, |t| flatten(t).len() == 11).await;
    assert_eq!(thread.tree().len(), 1);
}

#[tokio::test]
async fn content_is_trimmed_and_mentions_extracted() {
    let server = MockServer::new();
    let thread = open(&server, 1).await;
    let c = thread
        .add_comment("  hi @bob, meet @carol_2 and @bob  ", None)
        .await
        .unwrap();
    assert_eq!(c.content, "hi @bob, meet @carol_2 and @bob");
    assert_eq!(c.mentions, vec!["bob", "carol_2"]);
    assert!(!c.is_edited);
}

#[tokio::test]
async fn only_authors_edit_or_delete() {
    let server = MockServer::new();
    let alice = open(&server, 1).await;
    let bob = open(&server, 2).await;
    let c = alice.add_comment("original", None).await.unwrap();

    assert_eq!(bob.edit_comment(c.id, "changed").await, Err(Error::Forbidden));
    assert_eq!(bob.delete_comment(c.id).await, Err(Error::Forbidden));
    let stored = server.comments();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "original");
    assert!(!stored[0].is_edited);

    // editing to the same content still marks the comment edited
    alice.edit_comment(c.id, "original").await.unwrap();
    let stored = server.comments();
    assert_eq!(stored[0].content, "original");
    assert!(stored[0].is_edited);
    wait_tree(&bob, |t| t.first().map_or(false, |n| n.comment.is_edited)).await;
}

#[tokio::test]
async fn invalid_mutations_are_rejected() {
    let server = MockServer::new();
    let thread = open(&server, 1).await;
    assert!(matches!(
        thread.add_comment(" \n\t", None).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        thread.add_comment("nul\0byte", None).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        thread.add_comment("reply", Some(CommentId::stub())).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        thread.edit_comment(CommentId::stub(), "edit").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        thread.react(CommentId::stub(), ReactionType::Like).await,
        Err(Error::NotFound(_))
    ));
    assert!(server.comments().is_empty());

    // parents must belong to the same thread
    let k = key();
    let elsewhere = server
        .backend_for(user(1))
        .insert_comment(NewCommentRow {
            author_id: user(1),
            workspace_id: k.workspace_id,
            entity_type: EntityType::Project,
            entity_id: k.entity_id,
            content: String::from("other thread"),
            parent_id: None,
            thread_level: 0,
            mentions: Vec::new(),
        })
        .await
        .unwrap();
    assert!(matches!(
        thread.add_comment("reply", Some(elsewhere.id)).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn second_reaction_replaces_first() {
    let server = MockServer::new();
    let alice = open(&server, 1).await;
    let bob = open(&server, 2).await;
    let c = alice.add_comment("react to me", None).await.unwrap();
    wait_tree(&bob, |t| t.len() == 1).await;

    bob.react(c.id, ReactionType::Like).await.unwrap();
    bob.react(c.id, ReactionType::Love).await.unwrap();
    let rows = server.reactions();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, user(2));
    assert_eq!(rows[0].reaction_type, ReactionType::Love);

    wait_tree(&alice, |t| {
        t.first().map_or(false, |n| {
            n.reactions.count(ReactionType::Love) == 1 && n.reactions.total() == 1
        })
    })
    .await;
    assert_eq!(alice.tree()[0].reactions.mine, None);
    wait_tree(&bob, |t| {
        t.first()
            .map_or(false, |n| n.reactions.mine == Some(ReactionType::Love))
    })
    .await;
    assert_eq!(bob.tree()[0].reactions.count(ReactionType::Like), 0);

    bob.unreact(c.id).await.unwrap();
    bob.unreact(c.id).await.unwrap();
    assert!(server.reactions().is_empty());
    wait_tree(&alice, |t| t.first().map_or(false, |n| n.reactions.total() == 0)).await;
}

#[tokio::test]
async fn concurrent_reactions_from_one_user_keep_one() {
    let server = MockServer::new();
    let phone = open(&server, 1).await;
    let laptop = open(&server, 1).await;
    let c = phone.add_comment("react to me", None).await.unwrap();
    wait_tree(&laptop, |t| t.len() == 1).await;

    let (a, b) = tokio::join!(
        phone.react(c.id, ReactionType::Like),
        laptop.react(c.id, ReactionType::Heart),
    );
    assert_eq!(a, Ok(()));
    assert_eq!(b, Ok(()));
    let rows = server.reactions();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, user(1));
}

#[tokio::test]
async fn reaction_events_apply_without_refetch() {
    let server = MockServer::new();
    let thread = open(&server, 1).await;
    let c = raw_post(&server, 2, "hello").await;
    wait_tree(&thread, |t| t.len() == 1).await;
    wait_for(&mut thread.sync_state(), |s| *s == SyncState::Subscribed).await;
    let fetches = server.fetch_count();

    server
        .backend_for(user(2))
        .insert_reaction(Reaction {
            comment_id: c.id,
            user_id: user(2),
            workspace_id: c.workspace_id,
            reaction_type: ReactionType::Laugh,
        })
        .await
        .unwrap();
    wait_tree(&thread, |t| {
        t.first()
            .map_or(false, |n| n.reactions.count(ReactionType::Laugh) == 1)
    })
    .await;
    assert_eq!(server.fetch_count(), fetches);
}

#[tokio::test]
async fn notifications_during_reconciliation_coalesce_into_one() {
    let server = MockServer::new();
    let thread = open(&server, 1).await;
    // initial load, then the reconciliation forced by subscribing
    assert_eq!(server.fetch_count(), 2);

    server.hold_fetches();
    raw_post(&server, 2, "first").await;
    poll_until(|| server.fetch_count() == 3).await;
    raw_post(&server, 2, "second").await;
    raw_post(&server, 2, "third").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.fetch_count(), 3);
    assert_eq!(*thread.sync_state().borrow(), SyncState::Reconciling);

    server.release_fetches();
    wait_for(&mut thread.view(), |v| v.revision >= 4).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.fetch_count(), 4);
    assert_eq!(thread.view().borrow().revision, 4);
    assert_eq!(thread.tree().len(), 3);
}

#[tokio::test]
async fn reactions_during_reconciliation_are_refetched() {
    let server = MockServer::new();
    let thread = open(&server, 1).await;
    let c = raw_post(&server, 2, "first").await;
    wait_tree(&thread, |t| t.len() == 1).await;
    wait_for(&mut thread.sync_state(), |s| *s == SyncState::Subscribed).await;
    let fetches = server.fetch_count();

    server.hold_fetches();
    raw_post(&server, 2, "second").await;
    poll_until(|| server.fetch_count() == fetches + 1).await;
    server
        .backend_for(user(2))
        .insert_reaction(Reaction {
            comment_id: c.id,
            user_id: user(2),
            workspace_id: c.workspace_id,
            reaction_type: ReactionType::Laugh,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.fetch_count(), fetches + 1);

    server.release_fetches();
    wait_tree(&thread, |t| {
        t.len() == 2 && t[0].reactions.count(ReactionType::Laugh) == 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.fetch_count(), fetches + 2);
    assert_eq!(thread.tree()[0].reactions.count(ReactionType::Laugh), 1);
}

#[tokio::test]
async fn reactions_outside_the_thread_do_not_refetch() {
    let server = MockServer::new();
    let k = key();
    let elsewhere = server
        .backend_for(user(2))
        .insert_comment(NewCommentRow {
            author_id: user(2),
            workspace_id: k.workspace_id,
            entity_type: k.entity_type,
            entity_id: EntityId(Uuid::from_bytes([0xCC; 16])),
            content: String::from("other task"),
            parent_id: None,
            thread_level: 0,
            mentions: Vec::new(),
        })
        .await
        .unwrap();
    let thread = open(&server, 1).await;
    let fetches = server.fetch_count();

    server.hold_fetches();
    raw_post(&server, 2, "here").await;
    poll_until(|| server.fetch_count() == fetches + 1).await;
    server
        .backend_for(user(2))
        .insert_reaction(Reaction {
            comment_id: elsewhere.id,
            user_id: user(2),
            workspace_id: k.workspace_id,
            reaction_type: ReactionType::Like,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.release_fetches();
    wait_tree(&thread, |t| t.len() == 1).await;
    wait_for(&mut thread.sync_state(), |s| *s == SyncState::Subscribed).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.fetch_count(), fetches + 1);
    assert_eq!(thread.tree()[0].reactions.total(), 0);
}

#[tokio::test]
async fn deleted_parent_promotes_reply() {
    let server = MockServer::new();
    let thread = open(&server, 1).await;
    let a = thread.add_comment("parent", None).await.unwrap();
    let b = thread.add_comment("reply", Some(a.id)).await.unwrap();
    wait_tree(&thread, |t| flatten(t).len() == 2).await;

    thread.delete_comment(a.id).await.unwrap();
    wait_tree(&thread, |t| ids(t) == vec![b.id]).await;
    assert_eq!(thread.tree()[0].comment.parent_id, Some(a.id));
}

#[tokio::test]
async fn failed_reconciliation_keeps_previous_tree() {
    let server = MockServer::new();
    let thread = open(&server, 1).await;
    raw_post(&server, 2, "kept").await;
    wait_tree(&thread, |t| t.len() == 1).await;
    wait_for(&mut thread.sync_state(), |s| *s == SyncState::Subscribed).await;
    let revision = thread.view().borrow().revision;

    let fetches = server.fetch_count();
    server.fail_next_fetches(1);
    raw_post(&server, 2, "missed").await;
    poll_until(|| server.fetch_count() == fetches + 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(thread.view().borrow().revision, revision);
    assert_eq!(thread.tree().len(), 1);

    thread.reload();
    wait_tree(&thread, |t| t.len() == 2).await;
}

#[tokio::test]
async fn reconnects_and_catches_up() {
    let server = MockServer::new();
    let thread = open(&server, 1).await;
    assert_eq!(server.subscribe_count(), 1);

    server.fail_next_subscriptions(2);
    server.disconnect_all();
    // no feed is listening, so only the reconnection can reveal this one
    let c = raw_post(&server, 2, "while you were away").await;
    wait_tree(&thread, |t| ids(t) == vec![c.id]).await;
    assert_eq!(server.subscribe_count(), 2);
    wait_for(&mut thread.sync_state(), |s| *s == SyncState::Subscribed).await;

    // and the new connection delivers notifications again
    let d = raw_post(&server, 2, "welcome back").await;
    wait_tree(&thread, |t| ids(t) == vec![c.id, d.id]).await;
}

#[tokio::test]
async fn typing_is_shared_with_others_only() {
    let server = MockServer::new();
    let alice = open(&server, 1).await;
    let bob = open(&server, 2).await;

    alice.broadcast_typing(true);
    wait_for(&mut bob.watch_typing(), |u| *u == vec![String::from("user 1")]).await;
    assert!(alice.typing_users().is_empty());

    alice.broadcast_typing(false);
    wait_for(&mut bob.watch_typing(), |u| u.is_empty()).await;
}

#[tokio::test]
async fn unreadable_thread_fails_to_load() {
    let server = MockServer::new();
    server.deny_read(user(1));
    assert!(matches!(
        load(&server, 1, config()).await,
        Err(Error::NotAuthorized)
    ));
}

#[tokio::test]
async fn slow_store_is_unavailable() {
    let server = MockServer::new();
    server.hold_fetches();
    let cfg = SyncConfig {
        store_timeout: Duration::from_millis(100),
        ..config()
    };
    assert!(matches!(
        load(&server, 1, cfg).await,
        Err(Error::Unavailable(_))
    ));
    server.release_fetches();
}

#[tokio::test]
async fn close_releases_the_feed() {
    let server = MockServer::new();
    let thread = open(&server, 1).await;
    assert_eq!(server.feed_count(), 1);
    let state = thread.sync_state();
    thread.close().await;
    assert_eq!(*state.borrow(), SyncState::Closed);
    assert_eq!(server.feed_count(), 0);
}

#[tokio::test]
async fn dropping_the_controller_closes_it() {
    let server = MockServer::new();
    let thread = open(&server, 1).await;
    let mut state = thread.sync_state();
    drop(thread);
    wait_for(&mut state, |s| *s == SyncState::Closed).await;
    poll_until(|| server.feed_count() == 0).await;
}

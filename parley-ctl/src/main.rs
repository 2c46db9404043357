use std::{sync::Arc, time::Duration};

use anyhow::Context;
use futures::{pin_mut, select, FutureExt};
use parley_client::{
    api::{
        AuthToken, CommentId, EntityId, EntityType, ReactionType, ThreadKey, Uuid, WorkspaceId,
    },
    CommentNode, CommentThread, HttpBackend, StoreClient, SyncConfig, WsFeed,
};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    /// Deadline for each call to the store
    #[structopt(long, default_value = "10")]
    timeout_secs: u64,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
struct Thread {
    workspace: Uuid,

    /// One of task, project, workspace, calendar_event
    entity_type: EntityType,

    entity: Uuid,
}

impl Thread {
    fn key(&self) -> ThreadKey {
        ThreadKey::new(
            WorkspaceId(self.workspace),
            self.entity_type,
            EntityId(self.entity),
        )
    }
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Show the user the token belongs to
    Whoami,

    /// Follow a thread live
    Watch {
        #[structopt(flatten)]
        thread: Thread,
    },

    /// Post a comment
    Post {
        #[structopt(flatten)]
        thread: Thread,

        content: String,

        /// Comment to reply to
        #[structopt(long)]
        parent: Option<Uuid>,
    },

    /// Replace the content of one of your comments
    Edit { comment: Uuid, content: String },

    /// Delete one of your comments, leaving its replies
    Delete { comment: Uuid },

    /// Set your reaction on a comment
    React {
        #[structopt(flatten)]
        thread: Thread,

        comment: Uuid,

        /// One of like, love, laugh, thumbs_up, thumbs_down, confused, heart
        kind: ReactionType,
    },

    /// Remove your reaction from a comment
    Unreact { comment: Uuid },
}

fn token() -> anyhow::Result<AuthToken> {
    let tok =
        std::env::var("PARLEY_TOKEN").context("retrieving PARLEY_TOKEN environment variable")?;
    let tok = Uuid::try_parse(&tok).context("parsing PARLEY_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

fn render_node(node: &CommentNode, depth: usize) {
    let c = &node.comment;
    let mut line = format!("{:indent$}- [{}] {}", "", c.id.0, c.content, indent = depth * 2);
    if c.is_edited {
        line.push_str(" (edited)");
    }
    for (kind, count) in &node.reactions.counts {
        let mine = match node.reactions.mine == Some(*kind) {
            true => "*",
            false => "",
        };
        line.push_str(&format!(" {kind}:{count}{mine}"));
    }
    println!("{line}");
    for r in &node.replies {
        render_node(r, depth + 1);
    }
}

fn render(tree: &[CommentNode], typing: &[String]) {
    println!("----");
    if tree.is_empty() {
        println!("(no comments yet)");
    }
    for root in tree {
        render_node(root, 0);
    }
    match typing.len() {
        0 => (),
        1 => println!("{} is typing...", typing[0]),
        _ => println!("{} are typing...", typing.join(", ")),
    }
}

async fn watch(thread: CommentThread) {
    let mut view = thread.view();
    let mut typing = thread.watch_typing();
    let ctrl_c = tokio::signal::ctrl_c().fuse();
    pin_mut!(ctrl_c);
    loop {
        {
            let tree = view.borrow_and_update().tree.clone();
            render(&tree, &typing.borrow_and_update());
        }
        let keep_going = {
            let view_changed = view.changed().fuse();
            let typing_changed = typing.changed().fuse();
            pin_mut!(view_changed, typing_changed);
            select! {
                res = view_changed => res.is_ok(),
                res = typing_changed => res.is_ok(),
                _ = ctrl_c => false,
            }
        };
        if !keep_going {
            break;
        }
    }
    thread.close().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let opt = <Opt as structopt::StructOpt>::from_args();

    let token = token()?;
    let backend = HttpBackend::new(opt.host.clone(), token);
    let session = backend.whoami().await.context("resolving session")?;
    let config = SyncConfig {
        store_timeout: Duration::from_secs(opt.timeout_secs),
        ..SyncConfig::default()
    };
    let store = StoreClient::new(Arc::new(backend.clone()), config.store_timeout);

    match opt.cmd {
        Command::Whoami => println!("{} ({})", session.display_name, session.user_id.0),
        Command::Watch { thread } => {
            let thread = CommentThread::load(
                session,
                thread.key(),
                Arc::new(backend),
                Arc::new(WsFeed::new(opt.host, token)),
                config,
            )
            .await
            .context("loading thread")?;
            watch(thread).await;
        }
        Command::Post {
            thread,
            content,
            parent,
        } => {
            let c = store
                .create_comment(
                    session.user_id,
                    &thread.key(),
                    &content,
                    parent.map(CommentId),
                )
                .await
                .context("posting comment")?;
            println!("{}", c.id.0);
        }
        Command::Edit { comment, content } => store
            .update_comment(CommentId(comment), session.user_id, &content)
            .await
            .context("editing comment")?,
        Command::Delete { comment } => store
            .delete_comment(CommentId(comment), session.user_id)
            .await
            .context("deleting comment")?,
        Command::React {
            thread,
            comment,
            kind,
        } => store
            .set_reaction(
                CommentId(comment),
                session.user_id,
                thread.key().workspace_id,
                kind,
            )
            .await
            .context("reacting to comment")?,
        Command::Unreact { comment } => store
            .clear_reaction(CommentId(comment), session.user_id)
            .await
            .context("removing reaction")?,
    }

    Ok(())
}

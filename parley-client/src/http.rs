use async_trait::async_trait;

use crate::api::{
    AuthToken, Backend, Comment, CommentId, CommentUpdate, Error, NewCommentRow, Reaction,
    ReactionType, Session, ThreadKey, UserId, WorkspaceId,
};

/// `Backend` over the store's REST API
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    host: String,
    token: AuthToken,
}

fn transport(err: reqwest::Error) -> Error {
    tracing::error!(?err, "store request failed");
    Error::Unavailable(format!("store request failed: {err}"))
}

// Kinds are kept as strings so that a row with a kind this client does not
// know about does not fail the whole batch
#[derive(serde::Deserialize)]
struct ReactionRow {
    comment_id: CommentId,
    user_id: UserId,
    workspace_id: WorkspaceId,
    reaction_type: String,
}

fn known_reactions(rows: Vec<ReactionRow>) -> Vec<Reaction> {
    rows.into_iter()
        .filter_map(|r| match r.reaction_type.parse::<ReactionType>() {
            Ok(reaction_type) => Some(Reaction {
                comment_id: r.comment_id,
                user_id: r.user_id,
                workspace_id: r.workspace_id,
                reaction_type,
            }),
            Err(err) => {
                tracing::warn!(?err, comment = ?r.comment_id, "skipping reaction of unknown kind");
                None
            }
        })
        .collect()
}

impl HttpBackend {
    pub fn new(host: impl Into<String>, token: AuthToken) -> HttpBackend {
        HttpBackend {
            client: reqwest::Client::new(),
            host: host.into(),
            token,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.host.trim_end_matches('/'), path)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        let resp = req
            .bearer_auth(self.token.0)
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.bytes().await.map_err(transport)?;
        Err(Error::parse(&body).unwrap_or_else(|err| {
            tracing::debug!(?err, %status, ?body, "error response has no parseable body");
            Error::from_status(status)
        }))
    }

    async fn json<R>(&self, req: reqwest::RequestBuilder) -> Result<R, Error>
    where
        R: for<'de> serde::Deserialize<'de>,
    {
        self.send(req).await?.json().await.map_err(|err| {
            tracing::error!(?err, "failed parsing store response");
            Error::Unavailable(format!("parsing store response: {err}"))
        })
    }

    /// Resolves the session the token belongs to
    pub async fn whoami(&self) -> Result<Session, Error> {
        self.json(self.client.get(self.url("whoami"))).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn select_comments(&self, thread: &ThreadKey) -> Result<Vec<Comment>, Error> {
        self.json(self.client.get(self.url("comments")).query(&[
            ("workspace_id", thread.workspace_id.0.to_string()),
            ("entity_type", thread.entity_type.to_string()),
            ("entity_id", thread.entity_id.0.to_string()),
        ]))
        .await
    }

    async fn select_comment(&self, id: CommentId) -> Result<Option<Comment>, Error> {
        let req = self.client.get(self.url(&format!("comments/{}", id.0)));
        match self.json(req).await {
            Ok(c) => Ok(Some(c)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn insert_comment(&self, row: NewCommentRow) -> Result<Comment, Error> {
        self.json(self.client.post(self.url("comments")).json(&row))
            .await
    }

    async fn update_comment(&self, id: CommentId, update: CommentUpdate) -> Result<(), Error> {
        let req = self
            .client
            .patch(self.url(&format!("comments/{}", id.0)))
            .json(&update);
        self.send(req).await.map(|_| ())
    }

    async fn delete_comment(&self, id: CommentId, author: UserId) -> Result<(), Error> {
        let req = self
            .client
            .delete(self.url(&format!("comments/{}", id.0)))
            .json(&author);
        self.send(req).await.map(|_| ())
    }

    async fn select_reactions(&self, comments: &[CommentId]) -> Result<Vec<Reaction>, Error> {
        let rows: Vec<ReactionRow> = self
            .json(self.client.post(self.url("reactions/search")).json(comments))
            .await?;
        Ok(known_reactions(rows))
    }

    async fn insert_reaction(&self, row: Reaction) -> Result<(), Error> {
        let req = self.client.post(self.url("reactions")).json(&row);
        self.send(req).await.map(|_| ())
    }

    async fn delete_reaction(&self, comment: CommentId, user: UserId) -> Result<(), Error> {
        let req = self.client.delete(self.url(&format!(
            "comments/{}/reactions/{}",
            comment.0, user.0
        )));
        self.send(req).await.map(|_| ())
    }
}

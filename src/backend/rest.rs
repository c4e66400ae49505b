//! REST Backend
//!
//! Client for the hosted PostgREST-style backend. Reads embed likes, saves
//! and comments so a post page is a single round trip.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::backend::{PageSource, PostBackend, SpeciesIdentifier};
use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::feed::{
    Comment, Cursor, Fact, FeedPage, Keyset, Notification, PageRequest, Post, PostUpdate, UserId,
};
use crate::identify::SpeciesRecord;

const POST_SELECT: &str =
    "*,author:profiles(username),likes(user_id),saved_posts(user_id),comments(*)";

// == Wire Rows ==
#[derive(Debug, Deserialize)]
struct UserRef {
    user_id: UserId,
}

#[derive(Debug, Deserialize)]
struct AuthorRow {
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentRow {
    id: String,
    post_id: String,
    user_id: UserId,
    content: String,
    created_at: DateTime<Utc>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Comment {
            id: row.id,
            post_id: row.post_id,
            author_id: row.user_id,
            text: row.content,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostRow {
    id: String,
    user_id: UserId,
    #[serde(default)]
    title: String,
    description: Option<String>,
    image_url: Option<String>,
    caption: Option<String>,
    species: Option<String>,
    created_at: DateTime<Utc>,
    author: Option<AuthorRow>,
    #[serde(default)]
    likes: Vec<UserRef>,
    #[serde(default)]
    saved_posts: Vec<UserRef>,
    #[serde(default)]
    comments: Vec<CommentRow>,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        let mut comments: Vec<Comment> = row.comments.into_iter().map(Comment::from).collect();
        comments.sort_by_key(|c| c.created_at);
        Post {
            id: row.id,
            author_id: row.user_id,
            author_name: row.author.and_then(|a| a.username),
            title: row.title,
            description: row.description,
            image_url: row.image_url,
            caption: row.caption,
            species: row.species,
            created_at: row.created_at,
            likes: row.likes.into_iter().map(|l| l.user_id).collect(),
            saves: row.saved_posts.into_iter().map(|s| s.user_id).collect(),
            comments,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FactRow {
    id: String,
    title: String,
    content: String,
    category: Option<String>,
    image_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<FactRow> for Fact {
    fn from(row: FactRow) -> Self {
        Fact {
            id: row.id,
            title: row.title,
            body: row.content,
            category: row.category,
            image_url: row.image_url,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct NotificationRow<'a> {
    user_id: &'a str,
    actor_id: &'a str,
    post_id: &'a str,
    #[serde(rename = "type")]
    kind: crate::feed::NotificationKind,
}

/// Maps a feed filter name onto its column in the posts table.
fn post_column(filter: &str) -> &str {
    match filter {
        "author_id" => "user_id",
        other => other,
    }
}

fn fact_column(filter: &str) -> &str {
    filter
}

// == REST Backend ==
pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    access_token: Option<String>,
}

impl RestBackend {
    // == Constructor ==
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            access_token: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut backend = Self::new(&config.backend_url);
        backend.api_key = config.backend_api_key.clone();
        backend.access_token = config.backend_access_token.clone();
        backend
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Adds the project key and the user's bearer token. The project key
    /// doubles as bearer for anonymous reads.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request;
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }
        match self.access_token.as_ref().or(self.api_key.as_ref()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorize(request).send().await?;
        check(response).await
    }

    /// Runs a mutation that must touch at least one row.
    async fn mutate_rows(&self, request: RequestBuilder, what: &str) -> Result<()> {
        let response = self
            .send(request.header("Prefer", "return=representation"))
            .await?;
        let rows: Vec<serde_json::Value> = response.json().await?;
        if rows.is_empty() {
            return Err(FeedError::NotFound(what.to_string()));
        }
        Ok(())
    }

    /// Pages newest-first over `table`, one row past the page to learn
    /// whether more exist.
    async fn fetch_rows<R>(
        &self,
        table: &str,
        select: &str,
        request: &PageRequest,
        column: fn(&str) -> &str,
    ) -> Result<(Vec<R>, bool)>
    where
        R: for<'de> Deserialize<'de>,
    {
        let mut query: Vec<(String, String)> = vec![
            ("select".into(), select.into()),
            ("order".into(), "created_at.desc,id.desc".into()),
            ("limit".into(), (request.page_size + 1).to_string()),
        ];
        match &request.cursor {
            Some(Cursor::Token(token)) => query.push(keyset_filter(&Keyset::parse(token)?)),
            Some(Cursor::Offset(offset)) => query.push(("offset".into(), offset.to_string())),
            None => {}
        }
        for (name, value) in &request.filters {
            query.push((column(name).to_string(), format!("eq.{value}")));
        }

        debug!(table, cursor = ?request.cursor, "fetching page");
        let response = self
            .send(self.client.get(self.table(table)).query(&query))
            .await?;
        let mut rows: Vec<R> = response.json().await?;
        let has_more = rows.len() > request.page_size;
        rows.truncate(request.page_size);
        Ok((rows, has_more))
    }
}

/// Maps non-success statuses onto feed errors.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FeedError::Unauthenticated,
        StatusCode::NOT_FOUND => FeedError::NotFound(body),
        _ => FeedError::Rejected(format!("{status}: {body}")),
    })
}

/// Rows strictly after `last` in `created_at.desc,id.desc` order.
fn keyset_filter(last: &Keyset) -> (String, String) {
    let at = last.created_at.to_rfc3339();
    if last.id.is_empty() {
        return ("created_at".into(), format!("lt.{at}"));
    }
    (
        "or".into(),
        format!(
            "(created_at.lt.\"{at}\",and(created_at.eq.\"{at}\",id.lt.\"{}\"))",
            last.id
        ),
    )
}

fn next_cursor<T>(
    request: &PageRequest,
    items: &[T],
    keyset: fn(&T) -> Keyset,
) -> Option<Cursor> {
    match &request.cursor {
        Some(Cursor::Offset(offset)) => Some(Cursor::Offset(offset + items.len())),
        _ => items.last().map(|last| Cursor::Token(keyset(last).token())),
    }
}

#[async_trait]
impl PageSource<Post> for RestBackend {
    async fn fetch_page(&self, request: &PageRequest) -> Result<FeedPage<Post>> {
        let (rows, has_more) = self
            .fetch_rows::<PostRow>("posts", POST_SELECT, request, post_column)
            .await?;
        let items: Vec<Post> = rows.into_iter().map(Post::from).collect();
        Ok(FeedPage {
            next_cursor: next_cursor(request, &items, Post::keyset),
            items,
            has_more,
        })
    }
}

#[async_trait]
impl PageSource<Fact> for RestBackend {
    async fn fetch_page(&self, request: &PageRequest) -> Result<FeedPage<Fact>> {
        let (rows, has_more) = self
            .fetch_rows::<FactRow>("facts", "*", request, fact_column)
            .await?;
        let items: Vec<Fact> = rows.into_iter().map(Fact::from).collect();
        Ok(FeedPage {
            next_cursor: next_cursor(request, &items, Fact::keyset),
            items,
            has_more,
        })
    }
}

#[async_trait]
impl PostBackend for RestBackend {
    async fn like(&self, post_id: &str, user_id: &str) -> Result<()> {
        let body = json!({ "post_id": post_id, "user_id": user_id });
        self.send(self.client.post(self.table("likes")).json(&body))
            .await?;
        Ok(())
    }

    async fn unlike(&self, post_id: &str, user_id: &str) -> Result<()> {
        let query = [("post_id", format!("eq.{post_id}")), ("user_id", format!("eq.{user_id}"))];
        self.send(self.client.delete(self.table("likes")).query(&query))
            .await?;
        Ok(())
    }

    async fn save(&self, post_id: &str, user_id: &str) -> Result<()> {
        let body = json!({ "post_id": post_id, "user_id": user_id });
        self.send(self.client.post(self.table("saved_posts")).json(&body))
            .await?;
        Ok(())
    }

    async fn unsave(&self, post_id: &str, user_id: &str) -> Result<()> {
        let query = [("post_id", format!("eq.{post_id}")), ("user_id", format!("eq.{user_id}"))];
        self.send(self.client.delete(self.table("saved_posts")).query(&query))
            .await?;
        Ok(())
    }

    async fn insert_comment(&self, post_id: &str, user_id: &str, text: &str) -> Result<Comment> {
        let body = json!({ "post_id": post_id, "user_id": user_id, "content": text });
        let response = self
            .send(
                self.client
                    .post(self.table("comments"))
                    .header("Prefer", "return=representation")
                    .json(&body),
            )
            .await?;
        let mut rows: Vec<CommentRow> = response.json().await?;
        rows.pop()
            .map(Comment::from)
            .ok_or_else(|| FeedError::InvalidResponse("comment insert returned no row".into()))
    }

    async fn update_post(&self, post_id: &str, update: &PostUpdate) -> Result<()> {
        let request = self
            .client
            .patch(self.table("posts"))
            .query(&[("id", format!("eq.{post_id}"))])
            .json(update);
        self.mutate_rows(request, post_id).await
    }

    async fn delete_post(&self, post_id: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.table("posts"))
            .query(&[("id", format!("eq.{post_id}"))]);
        self.mutate_rows(request, post_id).await
    }

    async fn create_notification(&self, notification: &Notification) -> Result<()> {
        let row = NotificationRow {
            user_id: &notification.recipient_id,
            actor_id: &notification.actor_id,
            post_id: &notification.post_id,
            kind: notification.kind,
        };
        self.send(self.client.post(self.table("notifications")).json(&row))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SpeciesIdentifier for RestBackend {
    async fn identify(&self, image: &[u8]) -> Result<SpeciesRecord> {
        let url = format!("{}/functions/v1/identify-species", self.base_url);
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec());
        let response = self.send(request).await?;
        Ok(response.json().await?)
    }
}

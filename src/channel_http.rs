//! HTTP channel gateway client.
//!
//! Talks to a small JSON gateway that owns the MTProto session for the
//! tracked channel. The gateway keeps the user session (phone login, 2FA)
//! out of this process; all we hold is a bearer token.
//!
//! # Gateway contract
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET`  | `/channels/{handle}` | `{ "peer_id", "title", "username" }` |
//! | `GET`  | `/channels/{peer_id}/messages?limit&offset_id&min_id&reverse` | `{ "messages": [...] }` |
//! | `POST` | `/channels/{peer_id}/messages/lookup` `{ "ids": [...] }` | `{ "messages": [...] }` |
//! | `GET`  | `/channels/{peer_id}/messages/{id}/media` | raw bytes, `404` when absent |
//!
//! Message pages are newest first unless `reverse=true`. `offset_id`
//! continues a page sequence: newest-first pages return ids below it,
//! oldest-first pages ids above it.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::{ChannelClient, ChannelMessage, ChannelRef, IterOptions, MessageCursor};
use crate::config::ChannelConfig;
use crate::error::ChannelError;

#[derive(Debug, Deserialize)]
struct MessagesPage {
    #[serde(default)]
    messages: Vec<ChannelMessage>,
}

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    ids: &'a [i64],
}

/// Channel client backed by the HTTP gateway.
pub struct HttpChannelClient {
    base_url: String,
    token: String,
    page_size: usize,
    http: reqwest::Client,
}

impl HttpChannelClient {
    pub fn new(config: &ChannelConfig, token: String) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            token,
            page_size: config.page_size,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ChannelError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(ChannelError::Status {
        status,
        body: body.chars().take(500).collect(),
    })
}

/// Pages through `/messages` lazily, one request per exhausted page.
struct HttpCursor {
    http: reqwest::Client,
    url: String,
    token: String,
    page_size: usize,
    opts: IterOptions,
    buffer: VecDeque<ChannelMessage>,
    offset_id: Option<i64>,
    exhausted: bool,
}

impl HttpCursor {
    async fn fetch_page(&mut self) -> Result<(), ChannelError> {
        let mut query: Vec<(&str, String)> = vec![
            ("limit", self.page_size.to_string()),
            ("reverse", self.opts.oldest_first.to_string()),
        ];
        if let Some(min_id) = self.opts.min_id {
            query.push(("min_id", min_id.to_string()));
        }
        if let Some(offset) = self.offset_id {
            query.push(("offset_id", offset.to_string()));
        }

        let resp = self
            .http
            .get(&self.url)
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await?;
        let page: MessagesPage = check_status(resp).await?.json().await?;
        debug!(count = page.messages.len(), offset = ?self.offset_id, "fetched message page");

        if page.messages.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.messages.last() {
            self.offset_id = Some(last.id);
        }
        self.buffer.extend(page.messages);
        Ok(())
    }
}

#[async_trait]
impl MessageCursor for HttpCursor {
    async fn next(&mut self) -> Result<Option<ChannelMessage>, ChannelError> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        Ok(self.buffer.pop_front())
    }
}

#[async_trait]
impl ChannelClient for HttpChannelClient {
    async fn resolve_channel(&self, handle: &str) -> Result<ChannelRef, ChannelError> {
        let handle = handle.trim_start_matches('@');
        let resp = self
            .http
            .get(self.url(&format!("/channels/{}", handle)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ChannelError::NotFound(handle.to_string()));
        }
        Ok(check_status(resp).await?.json().await?)
    }

    async fn iter_messages(
        &self,
        channel: &ChannelRef,
        opts: IterOptions,
    ) -> Result<Box<dyn MessageCursor>, ChannelError> {
        Ok(Box::new(HttpCursor {
            http: self.http.clone(),
            url: self.url(&format!("/channels/{}/messages", channel.peer_id)),
            token: self.token.clone(),
            page_size: self.page_size,
            opts,
            buffer: VecDeque::new(),
            offset_id: None,
            exhausted: false,
        }))
    }

    async fn fetch_messages_by_ids(
        &self,
        channel: &ChannelRef,
        ids: &[i64],
    ) -> Result<Vec<ChannelMessage>, ChannelError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self
            .http
            .post(self.url(&format!("/channels/{}/messages/lookup", channel.peer_id)))
            .bearer_auth(&self.token)
            .json(&LookupRequest { ids })
            .send()
            .await?;
        let page: MessagesPage = check_status(resp).await?.json().await?;
        Ok(page.messages)
    }

    async fn download_media(
        &self,
        channel: &ChannelRef,
        message: &ChannelMessage,
    ) -> Result<Vec<u8>, ChannelError> {
        let resp = self
            .http
            .get(self.url(&format!(
                "/channels/{}/messages/{}/media",
                channel.peer_id, message.id
            )))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let bytes = check_status(resp).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

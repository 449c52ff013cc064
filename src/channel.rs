//! Channel client abstraction.
//!
//! The sync engine never talks to a messaging protocol directly. It consumes
//! a [`ChannelClient`]: an explicit session object constructed once per
//! process and handed to the engine, which connects at the start of a run
//! and disconnects at the end.
//!
//! # Implementations
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`HttpChannelClient`](crate::channel_http::HttpChannelClient) | JSON gateway in front of an MTProto session |
//! | [`MemoryChannel`] | In-process channel for tests and local experiments |

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::ChannelError;

/// A resolved channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    /// Stable external peer identifier.
    pub peer_id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Document,
    Other,
}

/// A post as delivered by the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: i64,
    /// Shared by all posts of one album.
    #[serde(default)]
    pub grouped_id: Option<i64>,
    /// Unix timestamp, seconds.
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Option<MediaKind>,
}

impl ChannelMessage {
    /// Identity of the listing this message belongs to: the album id when
    /// present, the message id otherwise.
    pub fn listing_key(&self) -> i64 {
        self.grouped_id.unwrap_or(self.id)
    }

    pub fn has_media(&self) -> bool {
        matches!(self.media, Some(MediaKind::Photo) | Some(MediaKind::Document))
    }

    pub fn has_photo(&self) -> bool {
        self.media == Some(MediaKind::Photo)
    }

    /// Text with surrounding whitespace removed; `None` when blank.
    pub fn text_trimmed(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Options for [`ChannelClient::iter_messages`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IterOptions {
    /// Only yield messages with an id strictly greater than this.
    pub min_id: Option<i64>,
    /// Yield oldest first instead of newest first.
    pub oldest_first: bool,
}

/// A lazy, finite, non-restartable sequence of messages.
#[async_trait]
pub trait MessageCursor: Send {
    async fn next(&mut self) -> Result<Option<ChannelMessage>, ChannelError>;
}

/// Capability the sync engine and media pipeline consume.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Open (or re-open) the underlying session.
    async fn connect(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn resolve_channel(&self, handle: &str) -> Result<ChannelRef, ChannelError>;

    /// Iterate the channel history. Newest first unless
    /// [`IterOptions::oldest_first`] is set.
    async fn iter_messages(
        &self,
        channel: &ChannelRef,
        opts: IterOptions,
    ) -> Result<Box<dyn MessageCursor>, ChannelError>;

    /// Return whichever of `ids` still exist. Absent ids are simply missing
    /// from the result.
    async fn fetch_messages_by_ids(
        &self,
        channel: &ChannelRef,
        ids: &[i64],
    ) -> Result<Vec<ChannelMessage>, ChannelError>;

    /// Download the attachment of a message. May return an empty buffer.
    async fn download_media(
        &self,
        channel: &ChannelRef,
        message: &ChannelMessage,
    ) -> Result<Vec<u8>, ChannelError>;

    /// Close the session. Called at the end of every run.
    async fn disconnect(&self) {}
}

// ═══════════════════════════════════════════════════════════════════════
// In-memory channel
// ═══════════════════════════════════════════════════════════════════════

struct MemoryState {
    channel: ChannelRef,
    messages: BTreeMap<i64, ChannelMessage>,
    media: HashMap<i64, Vec<u8>>,
    lookup_blackout: bool,
    fail_iteration_after: Option<usize>,
    connect_gate: Option<Arc<Notify>>,
    panic_on_connect: bool,
}

/// In-memory channel for tests.
///
/// Messages are kept ordered by id. A "lookup blackout" makes
/// [`fetch_messages_by_ids`](ChannelClient::fetch_messages_by_ids) return
/// nothing, the way a revoked session or a permissions change does.
pub struct MemoryChannel {
    handle: String,
    state: RwLock<MemoryState>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MemoryChannel {
    pub fn new(handle: &str, peer_id: i64) -> Self {
        let handle = handle.trim_start_matches('@').to_string();
        Self {
            state: RwLock::new(MemoryState {
                channel: ChannelRef {
                    peer_id,
                    title: Some(format!("{} channel", handle)),
                    username: Some(handle.clone()),
                },
                messages: BTreeMap::new(),
                media: HashMap::new(),
                lookup_blackout: false,
                fail_iteration_after: None,
                connect_gate: None,
                panic_on_connect: false,
            }),
            handle,
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Add or replace (edit) a message.
    pub fn push(&self, message: ChannelMessage) {
        let mut state = self.state.write().unwrap();
        state.messages.insert(message.id, message);
    }

    /// Add a photo message together with its downloadable bytes.
    pub fn push_photo(&self, mut message: ChannelMessage, bytes: Vec<u8>) {
        message.media = Some(MediaKind::Photo);
        let mut state = self.state.write().unwrap();
        state.media.insert(message.id, bytes);
        state.messages.insert(message.id, message);
    }

    /// Delete a message from the channel.
    pub fn remove(&self, id: i64) {
        let mut state = self.state.write().unwrap();
        state.messages.remove(&id);
        state.media.remove(&id);
    }

    pub fn set_lookup_blackout(&self, on: bool) {
        self.state.write().unwrap().lookup_blackout = on;
    }

    /// Make every cursor fail after yielding `n` messages.
    pub fn fail_iteration_after(&self, n: Option<usize>) {
        self.state.write().unwrap().fail_iteration_after = n;
    }

    /// Make the next `connect` wait until the returned handle is notified.
    pub fn hold_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.write().unwrap().connect_gate = Some(gate.clone());
        gate
    }

    /// Make `connect` panic, the way a crashing session driver would.
    pub fn panic_on_connect(&self, on: bool) {
        self.state.write().unwrap().panic_on_connect = on;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

struct MemoryCursor {
    pending: VecDeque<ChannelMessage>,
    yielded: usize,
    fail_after: Option<usize>,
}

#[async_trait]
impl MessageCursor for MemoryCursor {
    async fn next(&mut self) -> Result<Option<ChannelMessage>, ChannelError> {
        if let Some(limit) = self.fail_after {
            if self.yielded >= limit {
                return Err(ChannelError::Other("connection reset".to_string()));
            }
        }
        let next = self.pending.pop_front();
        if next.is_some() {
            self.yielded += 1;
        }
        Ok(next)
    }
}

#[async_trait]
impl ChannelClient for MemoryChannel {
    async fn connect(&self) -> Result<(), ChannelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let panics = self.state.read().unwrap().panic_on_connect;
        if panics {
            panic!("channel session crashed");
        }
        let gate = self.state.write().unwrap().connect_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(())
    }

    async fn resolve_channel(&self, handle: &str) -> Result<ChannelRef, ChannelError> {
        if handle.trim_start_matches('@') != self.handle {
            return Err(ChannelError::NotFound(handle.to_string()));
        }
        Ok(self.state.read().unwrap().channel.clone())
    }

    async fn iter_messages(
        &self,
        channel: &ChannelRef,
        opts: IterOptions,
    ) -> Result<Box<dyn MessageCursor>, ChannelError> {
        let state = self.state.read().unwrap();
        if channel.peer_id != state.channel.peer_id {
            return Err(ChannelError::NotFound(channel.peer_id.to_string()));
        }
        let min_id = opts.min_id.unwrap_or(0);
        let mut pending: VecDeque<ChannelMessage> = state
            .messages
            .values()
            .filter(|m| m.id > min_id)
            .cloned()
            .collect();
        if !opts.oldest_first {
            pending = pending.into_iter().rev().collect();
        }
        Ok(Box::new(MemoryCursor {
            pending,
            yielded: 0,
            fail_after: state.fail_iteration_after,
        }))
    }

    async fn fetch_messages_by_ids(
        &self,
        _channel: &ChannelRef,
        ids: &[i64],
    ) -> Result<Vec<ChannelMessage>, ChannelError> {
        let state = self.state.read().unwrap();
        if state.lookup_blackout {
            return Ok(Vec::new());
        }
        Ok(ids
            .iter()
            .filter_map(|id| state.messages.get(id).cloned())
            .collect())
    }

    async fn download_media(
        &self,
        _channel: &ChannelRef,
        message: &ChannelMessage,
    ) -> Result<Vec<u8>, ChannelError> {
        let state = self.state.read().unwrap();
        Ok(state.media.get(&message.id).cloned().unwrap_or_default())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

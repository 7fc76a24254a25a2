use crate::config::NodeConfig;
use crate::connection::Connection;
use crate::error::{LavalinkError, Result};
use crate::event::{default_error_handler, ErrorHandler, EventBroadcaster};
use crate::guild_connection::GuildConnection;
use crate::protocol::{EventFrame, InboundFrame, OutboundPayload};
use crate::types::{GuildId, NodeStats, VoiceSession};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Connection to a Lavalink node
///
/// A `NodeConnection` owns the node websocket and every [`GuildConnection`]
/// attached through it. Inbound frames are routed to the guild named in the
/// frame; frames for guilds that are no longer attached are dropped.
///
/// Cloning is cheap and yields another handle to the same connection.
///
/// # Example
///
/// ```no_run
/// use lavalink_session::{LavalinkTrack, NodeConfig, NodeConnection, VoiceSession};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let node = NodeConnection::connect(NodeConfig::new("localhost", 2333, 1234)).await?;
///
///     // Filled in from the gateway's voice state and voice server updates.
///     let session = VoiceSession {
///         guild_id: 81384788765712384,
///         channel_id: 81384788862181376,
///         session_id: "session".to_string(),
///         token: "token".to_string(),
///         endpoint: "us-east1.discord.media:443".to_string(),
///     };
///     let guild = node.connect_guild(session).await?;
///
///     let track = LavalinkTrack::decode("QAAAjQIAJVJpY2sgQXN0bGV5...")?;
///     guild.play(&track).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct NodeConnection {
    inner: Arc<NodeInner>,
}

pub(crate) struct NodeInner {
    config: NodeConfig,
    transport: Connection,
    sessions: Mutex<HashMap<GuildId, GuildConnection>>,
    closed: AtomicBool,
    last_stats: Mutex<Option<NodeStats>>,
    statistics_received: EventBroadcaster<NodeStats>,
    error_handler: ErrorHandler,
}

impl fmt::Debug for NodeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConnection")
            .field("url", &self.inner.config.websocket_url())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl NodeConnection {
    /// Connect to a node, reporting handler failures through `tracing`
    pub async fn connect(config: NodeConfig) -> Result<Self> {
        Self::connect_with_error_handler(config, default_error_handler()).await
    }

    /// Connect to a node with a custom sink for event handler failures
    pub async fn connect_with_error_handler(config: NodeConfig, error_handler: ErrorHandler) -> Result<Self> {
        let (transport, inbound) = Connection::connect(&config).await?;
        let node = Self::from_transport(config, transport, error_handler);
        node.spawn_frame_loop(inbound);
        tracing::info!("Connected to node {}", node.inner.config.websocket_url());
        Ok(node)
    }

    pub(crate) fn from_transport(config: NodeConfig, transport: Connection, error_handler: ErrorHandler) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                config,
                transport,
                sessions: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                last_stats: Mutex::new(None),
                statistics_received: EventBroadcaster::new("LAVALINK_STATISTICS_RECEIVED", error_handler.clone()),
                error_handler,
            }),
        }
    }

    /// Process inbound frames one at a time, in arrival order
    fn spawn_frame_loop(&self, mut inbound: mpsc::UnboundedReceiver<String>) {
        let node = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                let Some(node) = node.upgrade() else {
                    break;
                };
                node.dispatch(&frame).await;
            }
            tracing::info!("Node frame loop stopped");
        });
    }

    /// Attach a player to an established voice session
    ///
    /// Registers a new [`GuildConnection`] for the session's guild and hands
    /// the voice credentials to the node.
    pub async fn connect_guild(&self, session: VoiceSession) -> Result<GuildConnection> {
        let guild = GuildConnection::new(
            Arc::downgrade(&self.inner),
            &session,
            self.inner.error_handler.clone(),
        );
        self.register(session.guild_id, guild.clone()).await?;

        if let Err(e) = self.inner.send(session.guild_id, &OutboundPayload::voice_update(&session)).await {
            guild.invalidate().await;
            self.inner.remove_session(session.guild_id, &guild).await;
            return Err(e);
        }

        tracing::info!(guild_id = session.guild_id, channel_id = session.channel_id, "Attached guild connection");
        Ok(guild)
    }

    pub(crate) async fn register(&self, guild_id: GuildId, guild: GuildConnection) -> Result<()> {
        self.inner.register(guild_id, guild).await
    }

    /// Detach a session; does nothing if it is not registered
    pub async fn unregister(&self, guild_id: GuildId) {
        self.inner.unregister(guild_id).await;
    }

    /// Serialize and transmit a command for a registered session
    pub async fn send(&self, guild_id: GuildId, payload: &OutboundPayload) -> Result<()> {
        self.inner.send(guild_id, payload).await
    }

    /// Route one inbound frame
    ///
    /// Unparseable frames and frames for unknown sessions are logged and dropped.
    pub async fn dispatch(&self, frame: &str) {
        self.inner.dispatch(frame).await;
    }

    /// The voice session for `guild_id` was ended by the chat platform
    ///
    /// The player is destroyed on the node and the guild connection invalidated.
    pub async fn voice_session_terminated(&self, guild_id: GuildId) {
        match self.guild_connection(guild_id).await {
            Some(guild) => guild.terminate().await,
            None => tracing::debug!(guild_id, "Voice session ended for unattached guild"),
        }
    }

    /// Invalidate every attached guild connection, then close the websocket
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let guilds: Vec<GuildConnection> = self
            .inner
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, guild)| guild)
            .collect();
        for guild in &guilds {
            guild.invalidate().await;
        }

        tracing::info!(guilds = guilds.len(), "Closing node connection");
        self.inner.transport.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Guild connection attached for `guild_id`, if any
    pub async fn guild_connection(&self, guild_id: GuildId) -> Option<GuildConnection> {
        self.inner.sessions.lock().await.get(&guild_id).cloned()
    }

    /// Ids of every attached guild
    pub async fn connected_guilds(&self) -> Vec<GuildId> {
        self.inner.sessions.lock().await.keys().copied().collect()
    }

    /// Most recent statistics reported by the node
    pub async fn last_stats(&self) -> Option<NodeStats> {
        self.inner.last_stats.lock().await.clone()
    }

    /// Triggered whenever the node reports its statistics
    pub fn statistics_received(&self) -> &EventBroadcaster<NodeStats> {
        &self.inner.statistics_received
    }
}

impl NodeInner {
    async fn register(&self, guild_id: GuildId, guild: GuildConnection) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(LavalinkError::ConnectionClosed);
        }
        match sessions.entry(guild_id) {
            Entry::Occupied(_) => Err(LavalinkError::DuplicateSession(guild_id)),
            Entry::Vacant(slot) => {
                slot.insert(guild);
                Ok(())
            }
        }
    }

    async fn unregister(&self, guild_id: GuildId) {
        if self.sessions.lock().await.remove(&guild_id).is_some() {
            tracing::debug!(guild_id, "Unregistered guild connection");
        }
    }

    /// Remove `guild_id` only while it still maps to `guild`
    pub(crate) async fn remove_session(&self, guild_id: GuildId, guild: &GuildConnection) {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(&guild_id).is_some_and(|current| current.same_connection(guild)) {
            sessions.remove(&guild_id);
            tracing::debug!(guild_id, "Unregistered guild connection");
        }
    }

    pub(crate) async fn send(&self, guild_id: GuildId, payload: &OutboundPayload) -> Result<()> {
        debug_assert_eq!(payload.guild_id(), guild_id, "payload addressed to another guild");
        let json = serde_json::to_string(payload)?;

        // Held across the write so a session cannot be removed mid-send.
        let sessions = self.sessions.lock().await;
        if !sessions.contains_key(&guild_id) {
            return Err(LavalinkError::UnknownSession(guild_id));
        }
        self.transport.send(json)
    }

    async fn dispatch(&self, frame: &str) {
        let frame: InboundFrame = match serde_json::from_str(frame) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping unparseable node frame: {}", e);
                return;
            }
        };

        match frame {
            InboundFrame::PlayerUpdate { guild_id, state } => {
                if let Some(guild) = self.lookup(guild_id).await {
                    guild.handle_player_update(state).await;
                }
            }
            InboundFrame::Event(EventFrame { guild_id, event }) => {
                if let Some(guild) = self.lookup(guild_id).await {
                    guild.handle_event(event).await;
                }
            }
            InboundFrame::Stats(stats) => {
                tracing::debug!(players = stats.players, playing = stats.playing_players, "Node statistics");
                *self.last_stats.lock().await = Some(stats.clone());
                self.statistics_received.broadcast(stats).await;
            }
            InboundFrame::Unknown => tracing::debug!("Ignoring frame with unknown op"),
        }
    }

    /// Session lookup for inbound routing; the map lock is released before returning
    async fn lookup(&self, guild_id: GuildId) -> Option<GuildConnection> {
        let guild = self.sessions.lock().await.get(&guild_id).cloned();
        if guild.is_none() {
            tracing::debug!(guild_id, "Dropping event for unattached guild");
        }
        guild
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::track::{LavalinkTrack, TrackInfo};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    /// Node whose outbound frames land in the returned receiver
    pub(crate) fn detached_node() -> (NodeConnection, mpsc::UnboundedReceiver<Message>) {
        detached_node_with(default_error_handler())
    }

    pub(crate) fn detached_node_with(
        error_handler: ErrorHandler,
    ) -> (NodeConnection, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let node = NodeConnection::from_transport(
            NodeConfig::new("localhost", 2333, 1),
            Connection::detached(tx),
            error_handler,
        );
        (node, rx)
    }

    pub(crate) fn voice_session(guild_id: GuildId) -> VoiceSession {
        VoiceSession {
            guild_id,
            channel_id: guild_id + 1000,
            session_id: format!("session-{}", guild_id),
            token: "token".to_string(),
            endpoint: "voice.example:443".to_string(),
        }
    }

    pub(crate) fn sample_track(title: &str) -> LavalinkTrack {
        LavalinkTrack::from_info(TrackInfo {
            title: title.to_string(),
            author: "artist".to_string(),
            length: Duration::from_secs(180),
            identifier: format!("{}-id", title),
            is_stream: false,
            uri: Some(format!("https://example.com/{}", title)),
            artwork_url: None,
            isrc: None,
            source_name: Some("http".to_string()),
            position: Duration::ZERO,
        })
        .unwrap()
    }

    /// Every frame written so far, parsed as JSON
    pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            match msg {
                Message::Text(text) => frames.push(serde_json::from_str(&text).unwrap()),
                other => panic!("unexpected message {:?}", other),
            }
        }
        frames
    }
}

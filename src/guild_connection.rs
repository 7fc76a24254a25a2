use crate::error::{LavalinkError, Result};
use crate::event::{ErrorHandler, EventBroadcaster, HandlerError};
use crate::node_connection::NodeInner;
use crate::protocol::{OutboundPayload, PlayerEventFrame, PlayerStateFrame};
use crate::track::LavalinkTrack;
use crate::types::{
    BandAdjustment, ChannelId, GuildId, PlayerState, PlayerUpdateEvent, TrackEndReason,
    TrackExceptionEvent, TrackFinishEvent, TrackStuckEvent, VoiceSession, WebSocketClosedEvent,
};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::{Mutex, MutexGuard};

/// Player attached to one guild's voice channel
///
/// Obtained from [`NodeConnection::connect_guild`](crate::NodeConnection::connect_guild).
/// Commands are fire-and-forget: they return once the command is queued on the
/// node socket, and the mirrored [`PlayerState`] is corrected by the node's
/// later player updates.
///
/// Once [`disconnect`](Self::disconnect) is called, or the voice session is ended
/// externally, every command fails with [`LavalinkError::InvalidSession`].
#[derive(Clone)]
pub struct GuildConnection {
    inner: Arc<GuildInner>,
}

struct GuildInner {
    guild_id: GuildId,
    channel_id: ChannelId,
    node: Weak<NodeInner>,
    state: Mutex<SessionState>,
    events: GuildEvents,
    error_handler: ErrorHandler,
}

struct SessionState {
    connected: bool,
    player: PlayerState,
}

struct GuildEvents {
    player_updated: EventBroadcaster<PlayerUpdateEvent>,
    playback_finished: EventBroadcaster<TrackFinishEvent>,
    track_stuck: EventBroadcaster<TrackStuckEvent>,
    track_exception: EventBroadcaster<TrackExceptionEvent>,
    websocket_closed: EventBroadcaster<WebSocketClosedEvent>,
}

impl fmt::Debug for GuildConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuildConnection")
            .field("guild_id", &self.inner.guild_id)
            .field("channel_id", &self.inner.channel_id)
            .finish_non_exhaustive()
    }
}

impl GuildConnection {
    pub(crate) fn new(node: Weak<NodeInner>, session: &VoiceSession, error_handler: ErrorHandler) -> Self {
        let events = GuildEvents {
            player_updated: EventBroadcaster::new("LAVALINK_PLAYER_UPDATE", error_handler.clone()),
            playback_finished: EventBroadcaster::new("LAVALINK_PLAYBACK_FINISHED", error_handler.clone()),
            track_stuck: EventBroadcaster::new("LAVALINK_TRACK_STUCK", error_handler.clone()),
            track_exception: EventBroadcaster::new("LAVALINK_TRACK_EXCEPTION", error_handler.clone()),
            websocket_closed: EventBroadcaster::new("LAVALINK_DISCORD_WEBSOCKET_CLOSED", error_handler.clone()),
        };

        Self {
            inner: Arc::new(GuildInner {
                guild_id: session.guild_id,
                channel_id: session.channel_id,
                node,
                state: Mutex::new(SessionState {
                    connected: true,
                    player: PlayerState::default(),
                }),
                events,
                error_handler,
            }),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.inner.guild_id
    }

    /// Voice channel the player is bound to
    pub fn channel_id(&self) -> ChannelId {
        self.inner.channel_id
    }

    /// Whether commands are still accepted
    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.connected
    }

    /// Snapshot of the mirrored player state
    pub async fn current_state(&self) -> PlayerState {
        self.inner.state.lock().await.player.clone()
    }

    /// Triggered whenever the node reports the player's position
    pub fn player_updated(&self) -> &EventBroadcaster<PlayerUpdateEvent> {
        &self.inner.events.player_updated
    }

    /// Triggered whenever playback of a track finishes
    pub fn playback_finished(&self) -> &EventBroadcaster<TrackFinishEvent> {
        &self.inner.events.playback_finished
    }

    /// Triggered whenever playback of a track gets stuck
    pub fn track_stuck(&self) -> &EventBroadcaster<TrackStuckEvent> {
        &self.inner.events.track_stuck
    }

    /// Triggered whenever playback of a track encounters an error
    pub fn track_exception(&self) -> &EventBroadcaster<TrackExceptionEvent> {
        &self.inner.events.track_exception
    }

    /// Triggered whenever the node's voice websocket to Discord is closed
    pub fn discord_websocket_closed(&self) -> &EventBroadcaster<WebSocketClosedEvent> {
        &self.inner.events.websocket_closed
    }

    // ========== Playback Control ==========

    /// Start playing a track, replacing the current one
    ///
    /// The mirrored current track is updated immediately.
    pub async fn play(&self, track: &LavalinkTrack) -> Result<()> {
        let mut state = self.lock_active().await?;
        let payload = OutboundPayload::play(self.guild_id(), track);
        state.player.current_track = Some(track.clone());
        self.transmit(&payload).await
    }

    /// Play only the `start..end` window of a track
    pub async fn play_partial(&self, track: &LavalinkTrack, start: Duration, end: Duration) -> Result<()> {
        let mut state = self.lock_active().await?;
        let payload = OutboundPayload::play_partial(self.guild_id(), track, start, end)?;
        state.player.current_track = Some(track.clone());
        self.transmit(&payload).await
    }

    /// Stop the player completely
    pub async fn stop(&self) -> Result<()> {
        let _state = self.lock_active().await?;
        self.transmit(&OutboundPayload::stop(self.guild_id())).await
    }

    pub async fn pause(&self) -> Result<()> {
        let _state = self.lock_active().await?;
        self.transmit(&OutboundPayload::pause(self.guild_id(), true)).await
    }

    pub async fn resume(&self) -> Result<()> {
        let _state = self.lock_active().await?;
        self.transmit(&OutboundPayload::pause(self.guild_id(), false)).await
    }

    /// Seek the current track to `position`
    pub async fn seek(&self, position: Duration) -> Result<()> {
        let _state = self.lock_active().await?;
        self.transmit(&OutboundPayload::seek(self.guild_id(), position)).await
    }

    /// Set the playback volume
    ///
    /// Accepts `0..=1000`; 100 is the default and values above it amplify.
    /// Anything other than 100 costs CPU on the node.
    pub async fn set_volume(&self, volume: i32) -> Result<()> {
        let _state = self.lock_active().await?;
        let payload = OutboundPayload::volume(self.guild_id(), volume)?;
        self.transmit(&payload).await
    }

    /// Adjust equalizer bands, at most one adjustment per band
    ///
    /// An empty slice sends nothing.
    pub async fn adjust_equalizer(&self, bands: &[BandAdjustment]) -> Result<()> {
        let _state = self.lock_active().await?;
        match OutboundPayload::equalizer(self.guild_id(), bands)? {
            Some(payload) => self.transmit(&payload).await,
            None => Ok(()),
        }
    }

    /// Reset all 15 equalizer bands to neutral
    pub async fn reset_equalizer(&self) -> Result<()> {
        let _state = self.lock_active().await?;
        self.transmit(&OutboundPayload::reset_equalizer(self.guild_id())).await
    }

    /// Destroy the player and detach from the node
    ///
    /// The connection is invalid from this point on, even if sending the
    /// destroy command fails.
    pub async fn disconnect(&self) -> Result<()> {
        let mut state = self.lock_active().await?;
        state.connected = false;
        let result = self.transmit(&OutboundPayload::destroy(self.guild_id())).await;
        drop(state);

        self.detach().await;
        tracing::info!(guild_id = self.guild_id(), "Disconnected guild connection");
        result
    }

    // ========== Lifecycle ==========

    /// Mark the connection invalid without contacting the node
    pub(crate) async fn invalidate(&self) {
        self.inner.state.lock().await.connected = false;
    }

    /// Voice session ended externally: destroy the player if still active and detach
    pub(crate) async fn terminate(&self) {
        let mut state = self.inner.state.lock().await;
        if !state.connected {
            return;
        }
        state.connected = false;
        if let Err(e) = self.transmit(&OutboundPayload::destroy(self.guild_id())).await {
            tracing::warn!(guild_id = self.guild_id(), "Failed to destroy player after voice session ended: {}", e);
        }
        drop(state);

        self.detach().await;
        tracing::info!(guild_id = self.guild_id(), "Voice session ended");
    }

    pub(crate) fn same_connection(&self, other: &GuildConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    async fn detach(&self) {
        if let Some(node) = self.inner.node.upgrade() {
            node.remove_session(self.guild_id(), self).await;
        }
    }

    async fn lock_active(&self) -> Result<MutexGuard<'_, SessionState>> {
        let state = self.inner.state.lock().await;
        if !state.connected {
            return Err(LavalinkError::InvalidSession);
        }
        Ok(state)
    }

    async fn transmit(&self, payload: &OutboundPayload) -> Result<()> {
        let node = self.inner.node.upgrade().ok_or(LavalinkError::ConnectionClosed)?;
        node.send(self.guild_id(), payload).await
    }

    // ========== Inbound Events ==========

    pub(crate) async fn handle_player_update(&self, frame: PlayerStateFrame) {
        let timestamp = UNIX_EPOCH + Duration::from_millis(frame.time);
        let position = Duration::from_millis(frame.position);
        {
            let mut state = self.inner.state.lock().await;
            state.player.last_update = Some(timestamp);
            state.player.playback_position = position;
        }

        self.inner
            .events
            .player_updated
            .broadcast(PlayerUpdateEvent {
                guild_id: self.guild_id(),
                timestamp,
                position,
            })
            .await;
    }

    pub(crate) async fn handle_event(&self, event: PlayerEventFrame) {
        let guild_id = self.guild_id();
        let events = &self.inner.events;

        match event {
            PlayerEventFrame::TrackEndEvent { track, reason } => {
                // A replaced track ends because of our own later play call.
                if reason != TrackEndReason::Replaced {
                    self.inner.state.lock().await.player.current_track = None;
                }
                if let Some(track) = self.decode(&track, events.playback_finished.name()) {
                    events
                        .playback_finished
                        .broadcast(TrackFinishEvent { guild_id, track, reason })
                        .await;
                }
            }
            PlayerEventFrame::TrackStuckEvent { track, threshold_ms } => {
                if let Some(track) = self.decode(&track, events.track_stuck.name()) {
                    events
                        .track_stuck
                        .broadcast(TrackStuckEvent {
                            guild_id,
                            threshold: Duration::from_millis(threshold_ms),
                            track,
                        })
                        .await;
                }
            }
            PlayerEventFrame::TrackExceptionEvent { track, error, exception } => {
                if let Some(track) = self.decode(&track, events.track_exception.name()) {
                    events
                        .track_exception
                        .broadcast(TrackExceptionEvent {
                            guild_id,
                            error: PlayerEventFrame::exception_message(error, exception),
                            track,
                        })
                        .await;
                }
            }
            PlayerEventFrame::WebSocketClosedEvent { code, reason, by_remote } => {
                tracing::debug!(guild_id, code, by_remote, "Discord voice websocket closed: {}", reason);
                events
                    .websocket_closed
                    .broadcast(WebSocketClosedEvent {
                        guild_id,
                        code,
                        reason,
                        by_remote,
                    })
                    .await;
            }
            PlayerEventFrame::Unknown => {
                tracing::debug!(guild_id, "Ignoring unknown player event");
            }
        }
    }

    /// Decode a token from an inbound event, reporting failures to the error sink
    fn decode(&self, token: &str, event: &'static str) -> Option<LavalinkTrack> {
        match LavalinkTrack::decode(token) {
            Ok(track) => Some(track),
            Err(e) => {
                tracing::warn!(guild_id = self.guild_id(), event_name = event, "Dropping event with undecodable track: {}", e);
                let error: HandlerError = Box::new(e);
                (self.inner.error_handler)(event, &error);
                None
            }
        }
    }
}

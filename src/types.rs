use crate::error::{LavalinkError, Result};
use crate::track::LavalinkTrack;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Guild identifier; doubles as the player session id on the node
pub type GuildId = u64;

/// Voice channel identifier
pub type ChannelId = u64;

/// Number of bands in the node's equalizer
pub const EQUALIZER_BANDS: u8 = 15;

/// Lowest accepted band gain (mutes the band)
pub const MIN_BAND_GAIN: f32 = -0.25;

/// Highest accepted band gain (doubles the band)
pub const MAX_BAND_GAIN: f32 = 1.0;

/// Highest accepted player volume; 100 is unity gain
pub const MAX_VOLUME: i32 = 1000;

/// Why a track stopped playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackEndReason {
    /// Played to the end
    Finished,
    /// Failed to start
    LoadFailed,
    /// Stopped by a stop or destroy command
    Stopped,
    /// Another track was started in its place
    Replaced,
    /// Player was cleaned up by the node
    Cleanup,
}

impl TrackEndReason {
    /// Whether the player is free to start the next track
    pub fn may_start_next(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed)
    }
}

/// Gain change for a single equalizer band
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandAdjustment {
    band: u8,
    gain: f32,
}

impl BandAdjustment {
    /// Create an adjustment; `band` must be below 15 and `gain` within `-0.25..=1.0`
    pub fn new(band: u8, gain: f32) -> Result<Self> {
        if band >= EQUALIZER_BANDS {
            return Err(LavalinkError::OutOfRange {
                parameter: "band",
                value: f64::from(band),
            });
        }
        if !(MIN_BAND_GAIN..=MAX_BAND_GAIN).contains(&gain) {
            return Err(LavalinkError::OutOfRange {
                parameter: "gain",
                value: f64::from(gain),
            });
        }
        Ok(Self { band, gain })
    }

    /// Neutral adjustment for a band
    pub(crate) fn neutral(band: u8) -> Self {
        Self { band, gain: 0.0 }
    }

    pub fn band(&self) -> u8 {
        self.band
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

/// Locally mirrored player state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerState {
    /// Track last started through this session, cleared when it finishes
    pub current_track: Option<LavalinkTrack>,
    /// Position reported by the last player update
    pub playback_position: Duration,
    /// Node timestamp of the last player update
    pub last_update: Option<SystemTime>,
}

/// Voice session negotiated with the chat platform for one guild
///
/// Everything here comes from the gateway's voice state and voice server updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSession {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub session_id: String,
    pub token: String,
    pub endpoint: String,
}

/// Player position report
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerUpdateEvent {
    pub guild_id: GuildId,
    pub timestamp: SystemTime,
    pub position: Duration,
}

/// A track stopped playing
#[derive(Debug, Clone, PartialEq)]
pub struct TrackFinishEvent {
    pub guild_id: GuildId,
    pub track: LavalinkTrack,
    pub reason: TrackEndReason,
}

/// A track failed to provide audio for longer than the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct TrackStuckEvent {
    pub guild_id: GuildId,
    pub threshold: Duration,
    pub track: LavalinkTrack,
}

/// A track raised an error during playback
#[derive(Debug, Clone, PartialEq)]
pub struct TrackExceptionEvent {
    pub guild_id: GuildId,
    pub error: String,
    pub track: LavalinkTrack,
}

/// The node's voice websocket to the chat platform was closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketClosedEvent {
    pub guild_id: GuildId,
    pub code: u16,
    pub reason: String,
    pub by_remote: bool,
}

/// Node resource statistics, sent periodically by the node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub players: u32,
    pub playing_players: u32,
    /// Uptime in milliseconds
    pub uptime: u64,
    pub memory: MemoryStats,
    pub cpu: CpuStats,
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

/// Audio frame counters for the last minute
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

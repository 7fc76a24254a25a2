use crate::error::{LavalinkError, Result};
use crate::track::LavalinkTrack;
use crate::types::{
    BandAdjustment, GuildId, NodeStats, TrackEndReason, VoiceSession, EQUALIZER_BANDS, MAX_VOLUME,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Command sent to the node for one player
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundPayload {
    VoiceUpdate {
        #[serde(with = "guild_id_string")]
        guild_id: GuildId,
        session_id: String,
        event: VoiceServerEvent,
    },
    Play {
        #[serde(with = "guild_id_string")]
        guild_id: GuildId,
        track: String,
    },
    #[serde(rename = "play")]
    PlayPartial {
        #[serde(with = "guild_id_string")]
        guild_id: GuildId,
        track: String,
        /// Milliseconds
        start_time: u64,
        /// Milliseconds
        end_time: u64,
    },
    Stop {
        #[serde(with = "guild_id_string")]
        guild_id: GuildId,
    },
    Pause {
        #[serde(with = "guild_id_string")]
        guild_id: GuildId,
        pause: bool,
    },
    Seek {
        #[serde(with = "guild_id_string")]
        guild_id: GuildId,
        /// Milliseconds
        position: u64,
    },
    Volume {
        #[serde(with = "guild_id_string")]
        guild_id: GuildId,
        volume: u16,
    },
    Equalizer {
        #[serde(with = "guild_id_string")]
        guild_id: GuildId,
        bands: Vec<BandAdjustment>,
    },
    Destroy {
        #[serde(with = "guild_id_string")]
        guild_id: GuildId,
    },
}

/// Raw voice server update forwarded to the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceServerEvent {
    pub token: String,
    #[serde(with = "guild_id_string")]
    pub guild_id: GuildId,
    pub endpoint: String,
}

impl OutboundPayload {
    pub fn voice_update(session: &VoiceSession) -> Self {
        Self::VoiceUpdate {
            guild_id: session.guild_id,
            session_id: session.session_id.clone(),
            event: VoiceServerEvent {
                token: session.token.clone(),
                guild_id: session.guild_id,
                endpoint: session.endpoint.clone(),
            },
        }
    }

    pub fn play(guild_id: GuildId, track: &LavalinkTrack) -> Self {
        Self::Play {
            guild_id,
            track: track.encoded().to_string(),
        }
    }

    /// Play only the `start..end` window of a track
    pub fn play_partial(
        guild_id: GuildId,
        track: &LavalinkTrack,
        start: Duration,
        end: Duration,
    ) -> Result<Self> {
        if end <= start {
            return Err(LavalinkError::InvalidRange { start, end });
        }
        Ok(Self::PlayPartial {
            guild_id,
            track: track.encoded().to_string(),
            start_time: millis(start),
            end_time: millis(end),
        })
    }

    pub fn stop(guild_id: GuildId) -> Self {
        Self::Stop { guild_id }
    }

    pub fn pause(guild_id: GuildId, pause: bool) -> Self {
        Self::Pause { guild_id, pause }
    }

    pub fn seek(guild_id: GuildId, position: Duration) -> Self {
        Self::Seek {
            guild_id,
            position: millis(position),
        }
    }

    /// Set the volume; accepts `0..=1000` where 100 is unity gain
    pub fn volume(guild_id: GuildId, volume: i32) -> Result<Self> {
        let volume = u16::try_from(volume)
            .ok()
            .filter(|v| i32::from(*v) <= MAX_VOLUME)
            .ok_or(LavalinkError::OutOfRange {
                parameter: "volume",
                value: f64::from(volume),
            })?;
        Ok(Self::Volume { guild_id, volume })
    }

    /// Adjust equalizer bands
    ///
    /// Returns `None` for an empty adjustment list, which is not worth a round trip.
    pub fn equalizer(guild_id: GuildId, bands: &[BandAdjustment]) -> Result<Option<Self>> {
        if bands.is_empty() {
            return Ok(None);
        }

        let mut seen = HashSet::with_capacity(bands.len());
        for adjustment in bands {
            if !seen.insert(adjustment.band()) {
                return Err(LavalinkError::DuplicateBand(adjustment.band()));
            }
        }

        Ok(Some(Self::Equalizer {
            guild_id,
            bands: bands.to_vec(),
        }))
    }

    /// Set every band back to neutral gain
    pub fn reset_equalizer(guild_id: GuildId) -> Self {
        Self::Equalizer {
            guild_id,
            bands: (0..EQUALIZER_BANDS).map(BandAdjustment::neutral).collect(),
        }
    }

    pub fn destroy(guild_id: GuildId) -> Self {
        Self::Destroy { guild_id }
    }

    /// Guild the command is addressed to
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::VoiceUpdate { guild_id, .. }
            | Self::Play { guild_id, .. }
            | Self::PlayPartial { guild_id, .. }
            | Self::Stop { guild_id }
            | Self::Pause { guild_id, .. }
            | Self::Seek { guild_id, .. }
            | Self::Volume { guild_id, .. }
            | Self::Equalizer { guild_id, .. }
            | Self::Destroy { guild_id } => *guild_id,
        }
    }
}

/// Frame pushed by the node
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundFrame {
    PlayerUpdate {
        #[serde(with = "guild_id_string")]
        guild_id: GuildId,
        state: PlayerStateFrame,
    },
    Event(EventFrame),
    Stats(NodeStats),
    #[serde(other)]
    Unknown,
}

/// Player event addressed to one guild
#[derive(Debug, Clone, Deserialize)]
pub struct EventFrame {
    #[serde(rename = "guildId", with = "guild_id_string")]
    pub guild_id: GuildId,
    #[serde(flatten)]
    pub event: PlayerEventFrame,
}

/// Authoritative player position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PlayerStateFrame {
    /// Node unix timestamp in milliseconds
    pub time: u64,
    /// Playback position in milliseconds
    #[serde(default)]
    pub position: u64,
}

/// Player event body, discriminated by `type`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEventFrame {
    TrackEndEvent {
        track: String,
        reason: TrackEndReason,
    },
    TrackStuckEvent {
        track: String,
        #[serde(rename = "thresholdMs")]
        threshold_ms: u64,
    },
    TrackExceptionEvent {
        track: String,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        exception: Option<ExceptionFrame>,
    },
    WebSocketClosedEvent {
        code: u16,
        #[serde(default)]
        reason: String,
        #[serde(rename = "byRemote")]
        by_remote: bool,
    },
    #[serde(other)]
    Unknown,
}

/// Structured exception reported by newer nodes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExceptionFrame {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub cause: Option<String>,
}

impl PlayerEventFrame {
    /// Human readable error of a track exception event
    pub(crate) fn exception_message(error: Option<String>, exception: Option<ExceptionFrame>) -> String {
        error
            .or_else(|| exception.and_then(|e| e.message.or(e.cause)))
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

fn millis(value: Duration) -> u64 {
    u64::try_from(value.as_millis()).unwrap_or(u64::MAX)
}

/// Snowflakes travel as decimal strings on the wire.
mod guild_id_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(de::Error::custom),
            Raw::Number(n) => Ok(n),
        }
    }
}

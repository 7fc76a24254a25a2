//! Rust library for driving Lavalink audio players
//!
//! This library provides an async API for controlling audio players hosted on a
//! Lavalink node. Every guild's player is multiplexed over one websocket to the
//! node. It supports:
//!
//! - Attaching players to voice sessions negotiated with Discord
//! - Playback control (play, partial play, stop, pause, seek)
//! - Volume and 15-band equalizer control
//! - Player, track and voice-socket event subscriptions
//! - Decoding and encoding Lavaplayer track tokens
//! - Node statistics
//!
//! # Quick Start
//!
//! ```no_run
//! use lavalink_session::{LavalinkTrack, NodeConfig, NodeConnection, VoiceSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = NodeConnection::connect(NodeConfig::from_env()?).await?;
//!
//!     let guild = node
//!         .connect_guild(VoiceSession {
//!             guild_id: 81384788765712384,
//!             channel_id: 81384788862181376,
//!             session_id: "gateway-session".to_string(),
//!             token: "voice-token".to_string(),
//!             endpoint: "us-east1.discord.media:443".to_string(),
//!         })
//!         .await?;
//!
//!     // React to tracks ending
//!     guild.playback_finished().register(|event| async move {
//!         println!("{} finished: {:?}", event.track.title(), event.reason);
//!         Ok::<(), lavalink_session::HandlerError>(())
//!     });
//!
//!     let track = LavalinkTrack::decode("QAAAjQIAJVJpY2sgQXN0bGV5...")?;
//!     guild.play(&track).await?;
//!     guild.set_volume(80).await?;
//!
//!     // Or consume events through a channel
//!     let mut updates = guild.player_updated().subscribe();
//!     if let Ok(update) = updates.recv().await {
//!         println!("Position: {:?}", update.position);
//!     }
//!
//!     guild.disconnect().await?;
//!     node.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **NodeConnection**: Owns the node websocket and routes frames to guilds
//! - **GuildConnection**: Per-guild player control and mirrored player state
//! - **EventBroadcaster**: Fan-out of events to isolated handlers
//! - **Connection**: Low-level WebSocket transport
//! - **Protocol**: JSON command and event structures
//! - **Track**: Track token codec

mod config;
mod connection;
mod error;
mod event;
mod guild_connection;
mod node_connection;
mod protocol;
mod subscription;
mod track;
mod types;

// Public exports
pub use config::NodeConfig;
pub use error::{LavalinkError, Result};
pub use event::{
    default_error_handler, log_handler_error, ErrorHandler, EventBroadcaster, HandlerError,
    HandlerId, SUBSCRIPTION_CAPACITY,
};
pub use guild_connection::GuildConnection;
pub use node_connection::NodeConnection;
pub use protocol::OutboundPayload;
pub use subscription::EventReceiver;
pub use track::{decode_track, encode_track, LavalinkTrack, TrackInfo};
pub use types::{
    BandAdjustment, ChannelId, CpuStats, FrameStats, GuildId, MemoryStats, NodeStats,
    PlayerState, PlayerUpdateEvent, TrackEndReason, TrackExceptionEvent, TrackFinishEvent,
    TrackStuckEvent, VoiceSession, WebSocketClosedEvent, EQUALIZER_BANDS, MAX_VOLUME,
};

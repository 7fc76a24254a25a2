//! Lavaplayer track token codec.
//!
//! A token is base64 over a message of the form
//!
//! ```text
//! u32 header    flags in the top 2 bits, body length in the low 30
//! u8  version   only present when the VERSIONED flag is set
//! utf title
//! utf author
//! i64 length    milliseconds
//! utf identifier
//! bool stream
//! ?utf uri          (version >= 2)
//! ?utf artwork url  (version >= 3)
//! ?utf isrc         (version >= 3)
//! utf source name
//! ..  source specific data
//! i64 position  milliseconds, last 8 bytes of the body
//! ```
//!
//! Strings are Java modified UTF-8 with a `u16` length prefix; nullable strings
//! carry a leading presence byte. Bytes past the declared body length are ignored.

use crate::error::{LavalinkError, Result};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const FLAG_VERSIONED: u32 = 1;
const SIZE_MASK: u32 = 0x3FFF_FFFF;
const HEADER_LEN: usize = 4;

/// Newest structure version this codec reads and writes.
pub const CURRENT_VERSION: u8 = 3;

const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Structured metadata carried inside a track token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    pub author: String,
    /// Total duration (meaningless for streams)
    pub length: Duration,
    /// Source-specific identifier (video id, URL, ...)
    pub identifier: String,
    pub is_stream: bool,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    pub isrc: Option<String>,
    /// Name of the source manager that produced the track, if the token carries one
    pub source_name: Option<String>,
    /// Start position encoded into the token
    pub position: Duration,
}

/// A playable track: its opaque token plus the metadata decoded from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LavalinkTrack {
    encoded: String,
    info: TrackInfo,
}

impl LavalinkTrack {
    /// Decode a track token
    pub fn decode(encoded: impl Into<String>) -> Result<Self> {
        let encoded = encoded.into();
        let info = decode_track(&encoded)?;
        Ok(Self { encoded, info })
    }

    /// Build a track from metadata, encoding a fresh token
    pub fn from_info(info: TrackInfo) -> Result<Self> {
        let encoded = encode_track(&info)?;
        Ok(Self { encoded, info })
    }

    /// The opaque token sent to the node
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn length(&self) -> Duration {
        self.info.length
    }
}

/// Decode a base64 track token into its metadata
pub fn decode_track(token: &str) -> Result<TrackInfo> {
    let raw = TOKEN_ENGINE
        .decode(token.trim())
        .map_err(|e| LavalinkError::MalformedToken(format!("invalid base64: {}", e)))?;

    let mut header = Reader::new(&raw);
    let header_bits = header.read_u32()?;
    let flags = header_bits >> 30;
    let size = (header_bits & SIZE_MASK) as usize;

    let body = raw.get(HEADER_LEN..HEADER_LEN + size).ok_or_else(|| {
        LavalinkError::MalformedToken(format!(
            "declared body of {} bytes but only {} present",
            size,
            raw.len() - HEADER_LEN
        ))
    })?;

    let mut r = Reader::new(body);
    let version = if flags & FLAG_VERSIONED != 0 {
        r.read_u8()?
    } else {
        1
    };
    if !(1..=CURRENT_VERSION).contains(&version) {
        return Err(LavalinkError::MalformedToken(format!(
            "unsupported structure version {}",
            version
        )));
    }

    let title = r.read_utf()?;
    let author = r.read_utf()?;
    let length = millis(r.read_i64()?);
    let identifier = r.read_utf()?;
    let is_stream = r.read_bool()?;
    let uri = if version >= 2 { r.read_nullable_utf()? } else { None };
    let (artwork_url, isrc) = if version >= 3 {
        (r.read_nullable_utf()?, r.read_nullable_utf()?)
    } else {
        (None, None)
    };

    // Older tokens may stop right after the common fields. An empty name is
    // what the encoder writes for a track without a source.
    let source_name = if r.remaining() > 0 {
        Some(r.read_utf()?).filter(|name| !name.is_empty())
    } else {
        None
    };
    let position = if r.remaining() >= 8 {
        let tail = &body[body.len() - 8..];
        millis(Reader::new(tail).read_i64()?)
    } else {
        Duration::ZERO
    };

    Ok(TrackInfo {
        title,
        author,
        length,
        identifier,
        is_stream,
        uri,
        artwork_url,
        isrc,
        source_name,
        position,
    })
}

/// Encode track metadata into a version 3 token
pub fn encode_track(info: &TrackInfo) -> Result<String> {
    let mut w = Writer::default();
    w.write_u8(CURRENT_VERSION);
    w.write_utf(&info.title)?;
    w.write_utf(&info.author)?;
    w.write_i64(as_millis(info.length));
    w.write_utf(&info.identifier)?;
    w.write_bool(info.is_stream);
    w.write_nullable_utf(info.uri.as_deref())?;
    w.write_nullable_utf(info.artwork_url.as_deref())?;
    w.write_nullable_utf(info.isrc.as_deref())?;
    w.write_utf(info.source_name.as_deref().unwrap_or_default())?;
    w.write_i64(as_millis(info.position));

    let body = w.into_inner();
    let size = u32::try_from(body.len())
        .ok()
        .filter(|s| *s <= SIZE_MASK)
        .ok_or_else(|| LavalinkError::MalformedToken("track body too large".to_string()))?;

    let mut raw = Vec::with_capacity(HEADER_LEN + body.len());
    raw.extend_from_slice(&(size | (FLAG_VERSIONED << 30)).to_be_bytes());
    raw.extend_from_slice(&body);
    Ok(TOKEN_ENGINE.encode(raw))
}

fn millis(value: i64) -> Duration {
    Duration::from_millis(value.max(0) as u64)
}

fn as_millis(value: Duration) -> i64 {
    i64::try_from(value.as_millis()).unwrap_or(i64::MAX)
}

fn truncated(need: usize, pos: usize, len: usize) -> LavalinkError {
    LavalinkError::MalformedToken(format!(
        "field of {} bytes at offset {} runs past end of {} byte body",
        need, pos, len
    ))
}

/// Big-endian cursor over a token body.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let bytes = self
            .data
            .get(self.pos..self.pos + n)
            .ok_or_else(|| truncated(n, self.pos, self.data.len()))?;
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    fn read_utf(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        decode_modified_utf8(self.take(len)?)
    }

    fn read_nullable_utf(&mut self) -> Result<Option<String>> {
        if self.read_bool()? {
            self.read_utf().map(Some)
        } else {
            Ok(None)
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn write_utf(&mut self, value: &str) -> Result<()> {
        let bytes = encode_modified_utf8(value);
        let len = u16::try_from(bytes.len()).map_err(|_| {
            LavalinkError::MalformedToken(format!("string of {} bytes is too long", bytes.len()))
        })?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(&bytes);
        Ok(())
    }

    fn write_nullable_utf(&mut self, value: Option<&str>) -> Result<()> {
        match value {
            Some(s) => {
                self.write_bool(true);
                self.write_utf(s)
            }
            None => {
                self.write_bool(false);
                Ok(())
            }
        }
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Decode Java's modified UTF-8 (CESU-8 surrogates, two-byte NUL).
fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    let bad = || LavalinkError::MalformedToken("invalid modified UTF-8".to_string());
    let cont = |i: usize| -> Result<u16> {
        match bytes.get(i) {
            Some(b) if b & 0xC0 == 0x80 => Ok(u16::from(b & 0x3F)),
            _ => Err(bad()),
        }
    };

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b >> 4 {
            0x0..=0x7 => {
                units.push(u16::from(b));
                i += 1;
            }
            0xC | 0xD => {
                units.push((u16::from(b & 0x1F) << 6) | cont(i + 1)?);
                i += 2;
            }
            0xE => {
                units.push((u16::from(b & 0x0F) << 12) | (cont(i + 1)? << 6) | cont(i + 2)?);
                i += 3;
            }
            _ => return Err(bad()),
        }
    }

    String::from_utf16(&units).map_err(|_| bad())
}

fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    fn utf(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    /// Hand-assembled version 2 body as lavaplayer writes it for a YouTube track.
    fn youtube_v2_body() -> Vec<u8> {
        let mut body = vec![2u8];
        utf(&mut body, "Never Gonna Give You Up");
        utf(&mut body, "Rick Astley");
        body.extend_from_slice(&212_000i64.to_be_bytes());
        utf(&mut body, "dQw4w9WgXcQ");
        body.push(0);
        body.push(1);
        utf(&mut body, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        utf(&mut body, "youtube");
        body.extend_from_slice(&0i64.to_be_bytes());
        body
    }

    fn wrap(flags: u32, body: &[u8], padding: usize) -> String {
        let mut raw = ((flags << 30) | body.len() as u32).to_be_bytes().to_vec();
        raw.extend_from_slice(body);
        raw.extend(std::iter::repeat(0u8).take(padding));
        STANDARD.encode(raw)
    }

    #[test]
    fn decodes_version_two_token() {
        let info = decode_track(&wrap(1, &youtube_v2_body(), 0)).unwrap();
        assert_eq!(info.title, "Never Gonna Give You Up");
        assert_eq!(info.author, "Rick Astley");
        assert_eq!(info.length, Duration::from_secs(212));
        assert_eq!(info.identifier, "dQw4w9WgXcQ");
        assert!(!info.is_stream);
        assert_eq!(info.uri.as_deref(), Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert_eq!(info.source_name.as_deref(), Some("youtube"));
        assert_eq!(info.position, Duration::ZERO);
        assert_eq!(info.artwork_url, None);
    }

    #[test]
    fn decodes_unversioned_token_as_version_one() {
        let mut body = Vec::new();
        utf(&mut body, "Live Radio");
        utf(&mut body, "Station");
        body.extend_from_slice(&i64::MAX.to_be_bytes());
        utf(&mut body, "http://radio.example/stream");
        body.push(1);

        let info = decode_track(&wrap(0, &body, 0)).unwrap();
        assert_eq!(info.title, "Live Radio");
        assert!(info.is_stream);
        assert_eq!(info.uri, None);
        assert_eq!(info.source_name, None);
    }

    #[test]
    fn reencoded_unversioned_token_keeps_missing_source() {
        let mut body = Vec::new();
        utf(&mut body, "Live Radio");
        utf(&mut body, "Station");
        body.extend_from_slice(&i64::MAX.to_be_bytes());
        utf(&mut body, "http://radio.example/stream");
        body.push(1);

        let original = decode_track(&wrap(0, &body, 0)).unwrap();
        let again = decode_track(&encode_track(&original).unwrap()).unwrap();
        assert_eq!(again.source_name, None);
        assert_eq!(again, original);
    }

    #[test]
    fn ignores_trailing_padding() {
        let padded = decode_track(&wrap(1, &youtube_v2_body(), 5)).unwrap();
        let exact = decode_track(&wrap(1, &youtube_v2_body(), 0)).unwrap();
        assert_eq!(padded, exact);
    }

    #[test]
    fn skips_source_specific_bytes_before_position() {
        let mut body = youtube_v2_body();
        body.truncate(body.len() - 8);
        utf(&mut body, "probe-info");
        body.extend_from_slice(&30_000i64.to_be_bytes());

        let info = decode_track(&wrap(1, &body, 0)).unwrap();
        assert_eq!(info.source_name.as_deref(), Some("youtube"));
        assert_eq!(info.position, Duration::from_secs(30));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut body = youtube_v2_body();
        body[0] = 9;
        let err = decode_track(&wrap(1, &body, 0)).unwrap_err();
        assert!(matches!(err, LavalinkError::MalformedToken(_)));
    }

    #[test]
    fn rejects_length_past_end() {
        let body = youtube_v2_body();
        let mut raw = ((1u32 << 30) | (body.len() as u32 + 10)).to_be_bytes().to_vec();
        raw.extend_from_slice(&body);
        let err = decode_track(&STANDARD.encode(raw)).unwrap_err();
        assert!(matches!(err, LavalinkError::MalformedToken(_)));
    }

    #[test]
    fn rejects_string_prefix_past_body() {
        let mut body = vec![2u8];
        body.extend_from_slice(&500u16.to_be_bytes());
        body.extend_from_slice(b"short");
        let err = decode_track(&wrap(1, &body, 0)).unwrap_err();
        assert!(matches!(err, LavalinkError::MalformedToken(_)));
    }

    #[test]
    fn rejects_non_base64() {
        assert!(matches!(
            decode_track("not a token!").unwrap_err(),
            LavalinkError::MalformedToken(_)
        ));
    }

    #[test]
    fn reencoded_token_decodes_to_same_metadata() {
        let original = decode_track(&wrap(1, &youtube_v2_body(), 3)).unwrap();
        let token = encode_track(&original).unwrap();
        assert_eq!(decode_track(&token).unwrap(), original);
    }

    #[test]
    fn modified_utf8_handles_nul_and_astral_characters() {
        let info = TrackInfo {
            title: "nul\0 and 🎵 notes".to_string(),
            author: "Beyoncé".to_string(),
            length: Duration::from_millis(1234),
            identifier: "id".to_string(),
            is_stream: false,
            uri: None,
            artwork_url: Some("https://img.example/a.png".to_string()),
            isrc: Some("USUM71703861".to_string()),
            source_name: Some("http".to_string()),
            position: Duration::from_millis(500),
        };
        let track = LavalinkTrack::from_info(info.clone()).unwrap();
        let decoded = LavalinkTrack::decode(track.encoded()).unwrap();
        assert_eq!(decoded.info(), &info);

        // NUL must use the two byte form, never a raw zero byte.
        assert_eq!(encode_modified_utf8("\0"), vec![0xC0, 0x80]);
        // Astral characters become two three-byte surrogates.
        assert_eq!(encode_modified_utf8("🎵").len(), 6);
    }
}

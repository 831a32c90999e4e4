//! Codec families and the string forms they are known by.
//!
//! Codec strings come from many places (container sample entries, FFmpeg
//! codec names, user settings) and are only ever compared through
//! [`CodecFamily`], never by ad hoc substring checks.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecFamily {
    H264,
    H265,
    Vp8,
    Vp9,
    Av1,
    Aac,
    Opus,
    Vorbis,
    Mp3,
    Flac,
    Unknown,
}

/// Prefix table, matched in order against the lowercased codec string.
/// `mp4a.69`/`mp4a.6b` (MPEG audio in MP4) must precede the generic `mp4a`.
const FAMILY_PREFIXES: &[(&str, CodecFamily)] = &[
    ("avc1", CodecFamily::H264),
    ("avc3", CodecFamily::H264),
    ("h264", CodecFamily::H264),
    ("hvc1", CodecFamily::H265),
    ("hev1", CodecFamily::H265),
    ("h265", CodecFamily::H265),
    ("hevc", CodecFamily::H265),
    ("vp08", CodecFamily::Vp8),
    ("vp8", CodecFamily::Vp8),
    ("vp09", CodecFamily::Vp9),
    ("vp9", CodecFamily::Vp9),
    ("av01", CodecFamily::Av1),
    ("av1", CodecFamily::Av1),
    ("mp4a.69", CodecFamily::Mp3),
    ("mp4a.6b", CodecFamily::Mp3),
    ("mp3", CodecFamily::Mp3),
    ("mp4a", CodecFamily::Aac),
    ("aac", CodecFamily::Aac),
    ("opus", CodecFamily::Opus),
    ("vorbis", CodecFamily::Vorbis),
    ("flac", CodecFamily::Flac),
];

impl CodecFamily {
    pub fn parse(codec: &str) -> Self {
        let lower = codec.trim().to_ascii_lowercase();
        FAMILY_PREFIXES
            .iter()
            .find(|(prefix, _)| lower.starts_with(prefix))
            .map(|(_, family)| *family)
            .unwrap_or(CodecFamily::Unknown)
    }

    /// Least specific tag a container writer is expected to accept for this family.
    pub fn canonical_tag(&self) -> Option<&'static str> {
        match self {
            CodecFamily::H264 => Some("avc1"),
            CodecFamily::H265 => Some("hvc1"),
            CodecFamily::Vp8 => Some("vp8"),
            CodecFamily::Vp9 => Some("vp09"),
            CodecFamily::Av1 => Some("av01"),
            CodecFamily::Aac => Some("mp4a.40.2"),
            CodecFamily::Opus => Some("opus"),
            CodecFamily::Vorbis => Some("vorbis"),
            CodecFamily::Mp3 => Some("mp3"),
            CodecFamily::Flac => Some("flac"),
            CodecFamily::Unknown => None,
        }
    }

    /// Full codec string substituted once when a codec rejects a more
    /// specific profile/level of the same family.
    pub fn fallback_profile(&self) -> Option<&'static str> {
        match self {
            CodecFamily::H264 => Some("avc1.42E01E"),
            CodecFamily::H265 => Some("hev1.1.6.L93.B0"),
            CodecFamily::Vp8 => Some("vp8"),
            CodecFamily::Vp9 => Some("vp09.00.10.08"),
            CodecFamily::Av1 => Some("av01.0.08M.08"),
            CodecFamily::Aac => Some("mp4a.40.2"),
            CodecFamily::Opus => Some("opus"),
            CodecFamily::Vorbis => Some("vorbis"),
            CodecFamily::Mp3 => Some("mp3"),
            CodecFamily::Flac => Some("flac"),
            CodecFamily::Unknown => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodecFamily::H264 => "H.264",
            CodecFamily::H265 => "H.265",
            CodecFamily::Vp8 => "VP8",
            CodecFamily::Vp9 => "VP9",
            CodecFamily::Av1 => "AV1",
            CodecFamily::Aac => "AAC",
            CodecFamily::Opus => "Opus",
            CodecFamily::Vorbis => "Vorbis",
            CodecFamily::Mp3 => "MP3",
            CodecFamily::Flac => "FLAC",
            CodecFamily::Unknown => "unknown",
        }
    }
}

/// ISO-BMFF sample entry names carried over as a track's codec tag.
pub const ISO_SAMPLE_ENTRIES: &[&str] = &["avc1", "avc3", "hvc1", "hev1", "vp09", "av01", "mp4a"];

/// The sample entry `codec` starts with, if it starts with one.
pub fn sample_entry(codec: &str) -> Option<&'static str> {
    let prefix = codec.get(0..4)?;
    ISO_SAMPLE_ENTRIES
        .iter()
        .copied()
        .find(|entry| entry.eq_ignore_ascii_case(prefix))
}

/// Little-endian four character code, as containers store it.
pub fn sample_entry_fourcc(entry: &str) -> u32 {
    entry
        .bytes()
        .take(4)
        .enumerate()
        .fold(0, |tag, (i, b)| tag | (u32::from(b) << (8 * i)))
}

pub fn sample_entry_from_fourcc(tag: u32) -> Option<&'static str> {
    let bytes = tag.to_le_bytes();
    ISO_SAMPLE_ENTRIES
        .iter()
        .copied()
        .find(|entry| entry.as_bytes().eq_ignore_ascii_case(&bytes))
}

/// Replaces the sample entry of `codec` with `entry` when both name the
/// same family, so `avc3`/`hev1` sources keep their in-band form.
pub fn with_sample_entry(codec: &str, entry: &str) -> String {
    match sample_entry(codec) {
        Some(current) if CodecFamily::parse(current) == CodecFamily::parse(entry) => {
            format!("{}{}", entry, &codec[current.len()..])
        }
        _ => codec.to_string(),
    }
}

impl fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
#[path = "codec_test.rs"]
mod codec_test;

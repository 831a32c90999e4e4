//! Container kinds: signature probing on input, format selection on output.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::CodecFamily;

/// Bytes sniffing looks at; shorter headers are still sniffed.
pub const SNIFF_HEADER_LEN: usize = 4096;

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const EBML_DOCTYPE_ID: [u8; 2] = [0x42, 0x82];
const QUICKTIME_BRAND: &[u8; 4] = b"qt  ";
const QUICKTIME_LEGACY_ATOMS: [&[u8; 4]; 5] = [b"moov", b"mdat", b"wide", b"free", b"pnot"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Mp4,
    WebM,
    QuickTime,
    Matroska,
}

/// Checked in order. The first structural match wins, so the generic
/// Matroska check stays behind WebM and the QuickTime one behind ISO-MP4.
const SIGNATURES: [(ContainerKind, fn(&[u8]) -> bool); 4] = [
    (ContainerKind::Mp4, is_iso_mp4),
    (ContainerKind::WebM, is_webm),
    (ContainerKind::QuickTime, is_quicktime),
    (ContainerKind::Matroska, is_matroska),
];

impl ContainerKind {
    /// Identify the container from the first bytes of a file.
    pub fn sniff(header: &[u8]) -> Option<Self> {
        SIGNATURES
            .iter()
            .find(|(_, matches)| matches(header))
            .map(|(kind, _)| *kind)
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerKind::Mp4 => "video/mp4",
            ContainerKind::WebM => "video/webm",
            ContainerKind::QuickTime => "video/quicktime",
            ContainerKind::Matroska => "video/x-matroska",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContainerKind::Mp4 => "ISO-MP4",
            ContainerKind::WebM => "WebM",
            ContainerKind::QuickTime => "QuickTime",
            ContainerKind::Matroska => "Matroska",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn ftyp_brand(header: &[u8]) -> Option<&[u8]> {
    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        Some(&header[8..12])
    } else {
        None
    }
}

fn is_iso_mp4(header: &[u8]) -> bool {
    matches!(ftyp_brand(header), Some(brand) if brand != QUICKTIME_BRAND)
}

fn is_quicktime(header: &[u8]) -> bool {
    match ftyp_brand(header) {
        Some(brand) => brand == QUICKTIME_BRAND,
        None => header.len() >= 8 && QUICKTIME_LEGACY_ATOMS.iter().any(|a| &header[4..8] == *a),
    }
}

fn is_matroska(header: &[u8]) -> bool {
    header.len() >= 4 && header[..4] == EBML_MAGIC
}

fn is_webm(header: &[u8]) -> bool {
    is_matroska(header) && ebml_doc_type(header).as_deref() == Some("webm")
}

/// Scans the EBML header for the DocType element and returns its value.
fn ebml_doc_type(header: &[u8]) -> Option<String> {
    let pos = header
        .windows(2)
        .position(|w| w == EBML_DOCTYPE_ID)?;
    let (len, size_bytes) = read_vint(&header[pos + 2..])?;
    let start = pos + 2 + size_bytes;
    let end = start.checked_add(len as usize)?;
    let raw = header.get(start..end)?;
    Some(
        String::from_utf8_lossy(raw)
            .trim_end_matches('\0')
            .to_string(),
    )
}

/// EBML variable-size integer: the count of leading zero bits gives the width.
fn read_vint(data: &[u8]) -> Option<(u64, usize)> {
    let first = *data.first()?;
    if first == 0 {
        return None;
    }
    let width = first.leading_zeros() as usize + 1;
    if width > 8 || data.len() < width {
        return None;
    }
    let mut value = (first as u64) & ((1u64 << (8 - width)) - 1);
    for b in &data[1..width] {
        value = (value << 8) | *b as u64;
    }
    Some((value, width))
}

/// Output container after resolving the requested format against the codecs
/// that will actually be written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Mp4,
    QuickTime,
    WebM,
    Matroska,
    M4a,
    WebmAudio,
}

impl OutputFormat {
    pub fn container(&self) -> ContainerKind {
        match self {
            OutputFormat::Mp4 | OutputFormat::M4a => ContainerKind::Mp4,
            OutputFormat::QuickTime => ContainerKind::QuickTime,
            OutputFormat::WebM | OutputFormat::WebmAudio => ContainerKind::WebM,
            OutputFormat::Matroska => ContainerKind::Matroska,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::QuickTime => "mov",
            OutputFormat::WebM | OutputFormat::WebmAudio => "webm",
            OutputFormat::Matroska => "mkv",
            OutputFormat::M4a => "m4a",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::QuickTime => "video/quicktime",
            OutputFormat::WebM => "video/webm",
            OutputFormat::Matroska => "video/x-matroska",
            OutputFormat::M4a => "audio/mp4",
            OutputFormat::WebmAudio => "audio/webm",
        }
    }

    /// Whether this container can hold a track of the given codec family.
    pub fn carries(&self, family: CodecFamily) -> bool {
        use CodecFamily::*;
        match self {
            OutputFormat::Mp4 => matches!(family, H264 | H265 | Vp9 | Av1 | Aac | Opus | Mp3 | Flac),
            OutputFormat::QuickTime => matches!(family, H264 | H265 | Aac | Mp3),
            OutputFormat::WebM => matches!(family, Vp8 | Vp9 | Av1 | Opus | Vorbis),
            OutputFormat::Matroska => family != Unknown,
            OutputFormat::M4a => matches!(family, Aac),
            OutputFormat::WebmAudio => matches!(family, Opus | Vorbis),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (.{})", self.mime_type(), self.extension())
    }
}

#[cfg(test)]
#[path = "container_test.rs"]
mod container_test;

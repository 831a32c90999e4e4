//! Mapping between codec strings and FFmpeg codec ids, plus hardware
//! encoder discovery with fallback to software encoders.

use ffmpeg_next::codec::Id;
use ffmpeg_next::ffi;

use crate::codec::{CodecFamily, sample_entry_from_fourcc, with_sample_entry};
use crate::container::OutputFormat;

pub fn codec_id(family: CodecFamily) -> Option<Id> {
    let id = match family {
        CodecFamily::H264 => Id::H264,
        CodecFamily::H265 => Id::HEVC,
        CodecFamily::Vp8 => Id::VP8,
        CodecFamily::Vp9 => Id::VP9,
        CodecFamily::Av1 => Id::AV1,
        CodecFamily::Aac => Id::AAC,
        CodecFamily::Opus => Id::OPUS,
        CodecFamily::Vorbis => Id::VORBIS,
        CodecFamily::Mp3 => Id::MP3,
        CodecFamily::Flac => Id::FLAC,
        CodecFamily::Unknown => return None,
    };
    Some(id)
}

/// Builds the codec string a container sample entry would carry for the
/// given stream parameters. The stream's own sample entry wins over the
/// default one for its family.
pub fn codec_string(parameters: &ffmpeg_next::codec::Parameters) -> String {
    let codec = family_codec_string(parameters);
    let tag = unsafe { (*parameters.as_ptr()).codec_tag };
    match sample_entry_from_fourcc(tag) {
        Some(entry) => with_sample_entry(&codec, entry),
        None => codec,
    }
}

fn family_codec_string(parameters: &ffmpeg_next::codec::Parameters) -> String {
    let (profile, level, extradata) = unsafe {
        let ptr = parameters.as_ptr();
        let extradata = if (*ptr).extradata.is_null() || (*ptr).extradata_size <= 0 {
            &[][..]
        } else {
            std::slice::from_raw_parts((*ptr).extradata, (*ptr).extradata_size as usize)
        };
        ((*ptr).profile, (*ptr).level, extradata)
    };

    match parameters.id() {
        Id::H264 => {
            if extradata.len() >= 4 && extradata[0] == 1 {
                format!(
                    "avc1.{:02X}{:02X}{:02X}",
                    extradata[1], extradata[2], extradata[3]
                )
            } else if profile > 0 && level > 0 {
                format!("avc1.{:02X}00{:02X}", profile, level)
            } else {
                "avc1".to_string()
            }
        }
        Id::HEVC => format!("hvc1.{}.6.L{}.B0", profile.max(1), level.max(93)),
        Id::VP8 => "vp8".to_string(),
        Id::VP9 => format!("vp09.{:02}.{:02}.08", profile.max(0), if level > 0 { level } else { 10 }),
        Id::AV1 => format!("av01.{}.{:02}M.08", profile.max(0), level.max(0)),
        Id::AAC => format!("mp4a.40.{}", if profile >= 0 { profile + 1 } else { 2 }),
        Id::OPUS => "opus".to_string(),
        Id::VORBIS => "vorbis".to_string(),
        Id::MP3 => "mp3".to_string(),
        Id::FLAC => "flac".to_string(),
        other => other.name().to_string(),
    }
}

/// Software encoders in order of preference.
fn software_encoders(family: CodecFamily) -> &'static [&'static str] {
    match family {
        CodecFamily::H264 => &["libx264", "libopenh264"],
        CodecFamily::H265 => &["libx265"],
        CodecFamily::Vp8 => &["libvpx"],
        CodecFamily::Vp9 => &["libvpx-vp9"],
        CodecFamily::Av1 => &["libsvtav1", "libaom-av1", "librav1e"],
        CodecFamily::Aac => &["aac", "libfdk_aac"],
        CodecFamily::Opus => &["libopus", "opus"],
        CodecFamily::Vorbis => &["libvorbis"],
        CodecFamily::Mp3 => &["libmp3lame"],
        CodecFamily::Flac => &["flac"],
        CodecFamily::Unknown => &[],
    }
}

fn hardware_encoders(family: CodecFamily) -> &'static [&'static str] {
    match family {
        CodecFamily::H264 => &["h264_nvenc", "h264_vaapi", "h264_qsv", "h264_v4l2m2m"],
        CodecFamily::H265 => &["hevc_nvenc", "hevc_vaapi", "hevc_qsv", "hevc_v4l2m2m"],
        CodecFamily::Vp9 => &["vp9_vaapi", "vp9_qsv"],
        CodecFamily::Av1 => &["av1_nvenc", "av1_vaapi", "av1_qsv"],
        _ => &[],
    }
}

/// Candidate encoders for a family: hardware first, then software, then
/// whatever FFmpeg registers for the codec id.
pub fn encoder_candidates(family: CodecFamily, allow_hardware: bool) -> Vec<ffmpeg_next::Codec> {
    let mut found = Vec::new();
    if allow_hardware {
        for name in hardware_encoders(family) {
            if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
                log::debug!("found hardware encoder: {}", name);
                found.push(codec);
            }
        }
    }
    for name in software_encoders(family) {
        if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
            found.push(codec);
        }
    }
    if found.is_empty() {
        if let Some(codec) = codec_id(family).and_then(ffmpeg_next::encoder::find) {
            found.push(codec);
        }
    }
    found
}

pub fn is_hardware(codec_name: &str) -> bool {
    ["nvenc", "vaapi", "qsv", "v4l2m2m"]
        .iter()
        .any(|suffix| codec_name.contains(suffix))
}

/// libx264 profile name for an `avc1.PPCCLL` string.
pub fn h264_profile(codec: &str) -> Option<&'static str> {
    let hex = codec.split('.').nth(1)?;
    match hex.get(0..2)?.to_ascii_uppercase().as_str() {
        "42" => Some("baseline"),
        "4D" => Some("main"),
        "58" => Some("extended"),
        "64" => Some("high"),
        _ => None,
    }
}

pub fn muxer_name(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Mp4 => "mp4",
        OutputFormat::M4a => "ipod",
        OutputFormat::QuickTime => "mov",
        OutputFormat::WebM | OutputFormat::WebmAudio => "webm",
        OutputFormat::Matroska => "matroska",
    }
}

/// Copies `data` into an FFmpeg-owned, padded buffer.
///
/// # Safety
/// `extradata` and `size` must be the extradata fields of a live codec
/// context or parameter set that does not yet own a buffer.
pub unsafe fn set_extradata(extradata: *mut *mut u8, size: *mut i32, data: &[u8]) {
    unsafe {
        let padded = data.len() + ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
        let buf = ffi::av_mallocz(padded) as *mut u8;
        if buf.is_null() {
            return;
        }
        std::ptr::copy_nonoverlapping(data.as_ptr(), buf, data.len());
        *extradata = buf;
        *size = data.len() as i32;
    }
}

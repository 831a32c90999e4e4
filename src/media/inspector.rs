use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use media_bus::{BusError, ContainerKind, Demuxer, MediaBackend, TrackId, TrackInfo, SNIFF_HEADER_LEN};

use crate::config::config;
use crate::error::TranscodeError;
use crate::media::types::{AudioStreamInfo, MediaInfo, VideoStreamInfo};

/// Share of the estimated overall bitrate given to video when the file also
/// has audio. A heuristic for containers that record no per-track bitrate.
pub const VIDEO_BITRATE_SHARE: f64 = 0.9;
/// Share given to audio in files without video.
pub const AUDIO_ONLY_BITRATE_SHARE: f64 = 0.1;

/// First video and first audio track, in container order.
pub fn select_tracks(tracks: &[TrackInfo]) -> (Option<&TrackInfo>, Option<&TrackInfo>) {
    (
        tracks.iter().find(|t| t.is_video()),
        tracks.iter().find(|t| t.is_audio()),
    )
}

/// Reads the head of `path` and identifies its container.
pub fn sniff_file(path: &Path) -> Result<(ContainerKind, u64), TranscodeError> {
    let file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();
    let mut header = Vec::with_capacity(SNIFF_HEADER_LEN);
    file.take(SNIFF_HEADER_LEN as u64).read_to_end(&mut header)?;
    let kind = ContainerKind::sniff(&header)
        .ok_or_else(|| TranscodeError::Parse("unrecognized container".to_string()))?;
    Ok((kind, size))
}

pub fn open_demuxer(
    backend: &dyn MediaBackend,
    path: &Path,
    kind: ContainerKind,
) -> Result<Box<dyn Demuxer>, TranscodeError> {
    backend.open(path, kind).map_err(|e| match e {
        BusError::Unavailable(msg) => TranscodeError::Unavailable(msg),
        other => TranscodeError::Parse(other.to_string()),
    })
}

#[derive(Default)]
struct TrackScan {
    duration_sum: i64,
    end: i64,
    video_timestamps: Vec<i64>,
}

fn scan_chunks(
    demuxer: &mut dyn Demuxer,
    video_id: Option<TrackId>,
) -> Result<Vec<(TrackId, TrackScan)>, TranscodeError> {
    let scan_limit = config().scan_chunk_count;
    let mut scans: Vec<(TrackId, TrackScan)> = Vec::new();
    while let Some((id, chunk)) = demuxer
        .read_chunk()
        .map_err(|e| TranscodeError::Parse(e.to_string()))?
    {
        let index = match scans.iter().position(|(track, _)| *track == id) {
            Some(index) => index,
            None => {
                scans.push((id, TrackScan::default()));
                scans.len() - 1
            }
        };
        let scan = &mut scans[index].1;
        scan.duration_sum += chunk.duration.max(0);
        scan.end = scan.end.max(chunk.timestamp + chunk.duration.max(0));
        if Some(id) == video_id && scan.video_timestamps.len() < scan_limit {
            scan.video_timestamps.push(chunk.timestamp);
        }
    }
    Ok(scans)
}

fn arrival_rate(timestamps: &[i64]) -> f64 {
    let (Some(first), Some(last)) = (timestamps.first(), timestamps.last()) else {
        return 0.0;
    };
    if timestamps.len() < 2 || last <= first {
        return 0.0;
    }
    (timestamps.len() - 1) as f64 / ((last - first) as f64 / 1_000_000.0)
}

/// Blocking inspection of a local file. Never writes to it.
pub fn inspect(backend: &dyn MediaBackend, path: &Path) -> Result<MediaInfo, TranscodeError> {
    let (container, file_size) = sniff_file(path)?;
    let mut demuxer = open_demuxer(backend, path, container)?;
    let tracks = demuxer.tracks().to_vec();
    let (video, audio) = select_tracks(&tracks);
    if video.is_none() && audio.is_none() {
        return Err(TranscodeError::Parse("no audio or video track".to_string()));
    }

    let declared_duration = demuxer.duration().filter(|d| *d > 0.0);
    let declared_fps = video.and_then(|v| v.frame_rate).filter(|f| *f > 0.0);
    let needs_scan = declared_duration.is_none()
        || video.is_some_and(|v| declared_fps.is_none() && v.sample_count == 0);
    let scans = if needs_scan {
        scan_chunks(demuxer.as_mut(), video.map(|v| v.id))?
    } else {
        Vec::new()
    };

    let duration = declared_duration.unwrap_or_else(|| {
        let longest = scans
            .iter()
            .map(|(_, scan)| {
                if scan.duration_sum > 0 {
                    scan.duration_sum
                } else {
                    scan.end
                }
            })
            .max()
            .unwrap_or(0);
        longest as f64 / 1_000_000.0
    });

    let global_bitrate = if duration > 0.0 {
        (file_size * 8) as f64 / duration
    } else {
        0.0
    };

    let video_info = video.map(|track| {
        let bitrate = track.bitrate.filter(|b| *b > 0).unwrap_or_else(|| {
            let share = if audio.is_some() { VIDEO_BITRATE_SHARE } else { 1.0 };
            (global_bitrate * share).round() as u64
        });
        let fps = declared_fps
            .or_else(|| {
                (track.sample_count > 0 && duration > 0.0)
                    .then(|| track.sample_count as f64 / duration)
            })
            .unwrap_or_else(|| {
                scans
                    .iter()
                    .find(|(id, _)| *id == track.id)
                    .map(|(_, scan)| arrival_rate(&scan.video_timestamps))
                    .unwrap_or(0.0)
            });
        VideoStreamInfo {
            codec: track.codec.clone(),
            width: track.width(),
            height: track.height(),
            bitrate,
            fps,
        }
    });

    let audio_info = audio.map(|track| {
        let bitrate = track.bitrate.filter(|b| *b > 0).unwrap_or_else(|| match &video_info {
            Some(video) => (global_bitrate - video.bitrate as f64).max(0.0).round() as u64,
            None => (global_bitrate * AUDIO_ONLY_BITRATE_SHARE).round() as u64,
        });
        let (sample_rate, channels) = match track.layout {
            media_bus::TrackLayout::Audio {
                sample_rate,
                channels,
            } => (sample_rate, channels),
            media_bus::TrackLayout::Video { .. } => (0, 0),
        };
        AudioStreamInfo {
            codec: track.codec.clone(),
            bitrate,
            channels,
            sample_rate,
        }
    });

    let info = MediaInfo {
        container,
        mime_type: container.mime_type().to_string(),
        duration,
        file_size,
        video: video_info,
        audio: audio_info,
    };
    log::debug!("inspected {}: {:?}", path.display(), info);
    Ok(info)
}

/// Runs [`inspect`] on a blocking thread.
pub async fn inspect_file(
    backend: Arc<dyn MediaBackend>,
    path: PathBuf,
) -> Result<MediaInfo, TranscodeError> {
    tokio::task::spawn_blocking(move || inspect(backend.as_ref(), &path)).await?
}

#[cfg(test)]
#[path = "inspector_test.rs"]
mod inspector_test;

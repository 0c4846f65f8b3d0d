//! Playlist serving: live window snapshots and master playlists.

use crate::state::{Job, StreamOutput};
use crate::streaming::response;
use bytes::Bytes;

/// Media playlist for one stream, rendered from its live window. 404 when
/// playlists are disabled for the job or nothing has been produced yet.
pub fn media_playlist_response(stream: &StreamOutput) -> Bytes {
    match stream.playlist() {
        Some(playlist) if !playlist.is_empty() => response::ok(
            response::CONTENT_TYPE_M3U8,
            response::NO_CACHE,
            playlist.render().as_bytes(),
        ),
        Some(_) => {
            tracing::debug!(stream = %stream.name(), "no segments in the live window yet");
            response::not_found()
        }
        None => response::not_found(),
    }
}

/// Master playlist for a job, listing one variant per stream.
pub fn master_playlist_response(job: &Job) -> Bytes {
    match job.master_playlist() {
        Some(master) => response::ok(
            response::CONTENT_TYPE_M3U8,
            response::NO_CACHE,
            master.as_bytes(),
        ),
        None => response::not_found(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JobConfig, PlaylistConfig, StreamConfig};
    use crate::state::build_job;

    fn config(playlists: bool) -> JobConfig {
        JobConfig {
            name: "demo".into(),
            playlists,
            streams: vec![StreamConfig {
                name: "hd".into(),
                bandwidth_kbps: 1500,
            }],
        }
    }

    #[test]
    fn empty_window_is_not_found() {
        let (job, _producers) =
            build_job(&config(true), 64 * 1024, &PlaylistConfig::default()).unwrap();
        let body = media_playlist_response(job.stream("hd").unwrap());
        assert!(String::from_utf8_lossy(&body).starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn window_with_segments_renders() {
        let (job, mut producers) =
            build_job(&config(true), 64 * 1024, &PlaylistConfig::default()).unwrap();
        producers[0].push(b"a", 0, true).unwrap();
        producers[0].push(b"b", 6_000_000, true).unwrap();

        let body = media_playlist_response(job.stream("hd").unwrap());
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.contains("Content-Type: application/vnd.apple.mpegurl\r\n"));
        assert!(text.contains("Cache-Control: no-cache\r\n"));
        assert!(text.contains("#EXTM3U"));
        assert!(text.contains("0.ts"));
    }

    #[test]
    fn playlists_disabled_is_not_found() {
        let (job, _producers) =
            build_job(&config(false), 64 * 1024, &PlaylistConfig::default()).unwrap();
        let media = media_playlist_response(job.stream("hd").unwrap());
        assert!(String::from_utf8_lossy(&media).starts_with("HTTP/1.1 404"));
        let master = master_playlist_response(&job);
        assert!(String::from_utf8_lossy(&master).starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn master_playlist_lists_variants() {
        let (job, _producers) =
            build_job(&config(true), 64 * 1024, &PlaylistConfig::default()).unwrap();
        let body = master_playlist_response(&job);
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.contains("hd/playlist.m3u8"));
    }
}

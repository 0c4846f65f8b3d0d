//! Sliding-window live media playlist.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fmt::Write;
use std::time::Duration;

/// One segment advertised in the playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub url: String,
    pub duration: Duration,
}

struct WindowState {
    entries: VecDeque<PlaylistEntry>,
    /// Counts every entry ever added, including ones the window dropped.
    sequence: u64,
}

/// Bounded FIFO of the most recent segments, rendered as a live M3U8.
///
/// Adding entries (producer notification path) and rendering (HTTP reader
/// path) run under a reader/writer lock separate from any cache lock.
pub struct PlaylistWindow {
    version: u32,
    /// Zero means unbounded: the playlist never slides and renders with an
    /// end-list tag.
    window_size: usize,
    state: RwLock<WindowState>,
}

impl PlaylistWindow {
    pub fn new(version: u32, window_size: usize) -> Self {
        Self {
            version,
            window_size,
            state: RwLock::new(WindowState {
                entries: VecDeque::new(),
                sequence: 0,
            }),
        }
    }

    /// Append a segment, dropping the oldest entry once the window is full.
    pub fn add_entry(&self, url: impl Into<String>, duration: Duration) {
        let mut state = self.state.write();
        while self.window_size != 0 && state.entries.len() >= self.window_size {
            state.entries.pop_front();
        }
        state.entries.push_back(PlaylistEntry {
            url: url.into(),
            duration,
        });
        state.sequence += 1;
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Media sequence number of the first entry currently in the window.
    pub fn media_sequence(&self) -> u64 {
        let state = self.state.read();
        state.sequence - state.entries.len() as u64
    }

    /// Render the current window snapshot as an M3U8 document.
    pub fn render(&self) -> String {
        let state = self.state.read();
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:{}", self.version).unwrap();
        writeln!(out, "#EXT-X-ALLOW-CACHE:NO").unwrap();
        writeln!(out, "#EXT-X-TARGETDURATION:{}", target_duration(&state.entries)).unwrap();
        if self.window_size != 0 {
            writeln!(
                out,
                "#EXT-X-MEDIA-SEQUENCE:{}",
                state.sequence - state.entries.len() as u64
            )
            .unwrap();
        }
        for entry in &state.entries {
            writeln!(out, "#EXTINF:{:.2},", entry.duration.as_secs_f64()).unwrap();
            writeln!(out, "{}", entry.url).unwrap();
        }
        if self.window_size == 0 {
            writeln!(out, "#EXT-X-ENDLIST").unwrap();
        }

        out
    }
}

/// Longest entry duration, rounded to whole seconds at the half-second.
fn target_duration(entries: &VecDeque<PlaylistEntry>) -> u64 {
    let max = entries
        .iter()
        .map(|e| e.duration)
        .max()
        .unwrap_or(Duration::ZERO);
    (max.as_millis() as u64 + 500) / 1000
}

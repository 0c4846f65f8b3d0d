use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub playlist: PlaylistConfig,

    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Worker tasks processing dispatch steps. Each runs at most one
    /// dispatch at a time, so this bounds delivery concurrency.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Pre-allocated session slots; connections beyond this are refused.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            max_sessions: default_max_sessions(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Per-stream circular cache capacity in bytes.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaylistConfig {
    /// M3U8 version tag value.
    #[serde(default = "default_playlist_version")]
    pub version: u32,

    /// Segments advertised per live playlist; 0 keeps every segment.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Producer timestamp units per second, for EXTINF durations.
    #[serde(default = "default_timescale")]
    pub timescale: u32,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            version: default_playlist_version(),
            window_size: default_window_size(),
            timescale: default_timescale(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobConfig {
    /// Job name; first path segment of every delivery URI.
    pub name: String,

    /// Render playlists for this job's streams.
    #[serde(default)]
    pub playlists: bool,

    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Stream name; second path segment of delivery URIs.
    pub name: String,

    /// Nominal bandwidth in kbps, advertised in the master playlist.
    #[serde(default = "default_bandwidth")]
    pub bandwidth_kbps: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    20119
}

fn default_workers() -> usize {
    10
}

fn default_max_sessions() -> usize {
    128
}

fn default_cache_capacity() -> usize {
    64 * 1024 * 1024
}

fn default_playlist_version() -> u32 {
    3
}

fn default_window_size() -> usize {
    5
}

fn default_timescale() -> u32 {
    1_000_000
}

fn default_bandwidth() -> u32 {
    1000
}

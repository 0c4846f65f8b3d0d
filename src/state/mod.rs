//! Job and stream registry.
//!
//! A job is one running encoder pipeline; each of its streams owns a
//! circular output cache and, when playlists are enabled, a live playlist
//! window. The registry resolves delivery URIs to jobs and tracks how many
//! sessions are currently reading from each job so supervising code never
//! tears down a cache still in use.

use crate::config::{Config, JobConfig, PlaylistConfig};
use anyhow::Result;
use dashmap::DashMap;
use ringcast_media::hls::VariantStream;
use ringcast_media::{CacheWriter, GopCache, MasterPlaylist, PlaylistWindow};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// One encoder output: cache plus optional live playlist.
pub struct StreamOutput {
    name: String,
    cache: Arc<GopCache>,
    playlist: Option<PlaylistWindow>,
}

impl StreamOutput {
    pub fn new(name: impl Into<String>, cache: Arc<GopCache>, playlist: Option<PlaylistWindow>) -> Self {
        Self {
            name: name.into(),
            cache,
            playlist,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache(&self) -> &Arc<GopCache> {
        &self.cache
    }

    pub fn playlist(&self) -> Option<&PlaylistWindow> {
        self.playlist.as_ref()
    }

    /// Last producer activity for this stream, nanoseconds since epoch.
    pub fn heartbeat(&self) -> u64 {
        self.cache.heartbeat()
    }
}

/// A named job and its streams.
pub struct Job {
    name: String,
    /// Incremented on every (re)start of the producing pipeline; sessions
    /// snapshot it and end their stream when it changes.
    age: AtomicU64,
    playing: AtomicBool,
    active_access: AtomicI64,
    master_playlist: Option<String>,
    streams: Vec<Arc<StreamOutput>>,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        streams: Vec<Arc<StreamOutput>>,
        master_playlist: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            age: AtomicU64::new(0),
            playing: AtomicBool::new(true),
            active_access: AtomicI64::new(0),
            master_playlist,
            streams,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn streams(&self) -> &[Arc<StreamOutput>] {
        &self.streams
    }

    pub fn stream(&self, name: &str) -> Option<&Arc<StreamOutput>> {
        self.streams.iter().find(|s| s.name() == name)
    }

    pub fn master_playlist(&self) -> Option<&str> {
        self.master_playlist.as_deref()
    }

    pub fn age(&self) -> u64 {
        self.age.load(Ordering::Acquire)
    }

    /// Mark a pipeline restart; live sessions notice and finish.
    pub fn bump_age(&self) {
        self.age.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    /// Sessions currently reading from this job.
    pub fn active_access(&self) -> i64 {
        self.active_access.load(Ordering::Acquire)
    }
}

/// RAII increment of a job's active-access counter. Dropping the guard
/// releases the access on every session exit path.
pub struct AccessGuard {
    job: Arc<Job>,
}

impl AccessGuard {
    pub fn new(job: Arc<Job>) -> Self {
        job.active_access.fetch_add(1, Ordering::AcqRel);
        Self { job }
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }
}

impl Drop for AccessGuard {
    fn drop(&mut self) {
        self.job.active_access.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Producer-side handle for one stream: forwards encoder buffers into the
/// cache and turns closed segments into playlist entries.
pub struct StreamProducer {
    writer: CacheWriter,
    stream: Arc<StreamOutput>,
}

impl StreamProducer {
    pub fn new(stream: Arc<StreamOutput>, timescale: u32) -> Self {
        Self {
            writer: CacheWriter::new(Arc::clone(stream.cache()), timescale),
            stream,
        }
    }

    pub fn stream(&self) -> &Arc<StreamOutput> {
        &self.stream
    }

    /// Push one encoded buffer; announces the segment this buffer closed,
    /// if any, to the stream's playlist window.
    pub fn push(&mut self, payload: &[u8], timestamp: u64, random_access: bool) -> Result<()> {
        if let Some(closed) = self.writer.write(payload, timestamp, random_access)? {
            if let Some(playlist) = self.stream.playlist() {
                playlist.add_entry(format!("{}.ts", closed.timestamp), closed.duration);
                tracing::debug!(
                    stream = %self.stream.name(),
                    timestamp = closed.timestamp,
                    "segment closed"
                );
            }
        }
        Ok(())
    }
}

/// Registry of all live jobs, shared between the server and whatever
/// supervises the producing pipelines.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, Arc<Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Arc<Job>) {
        tracing::info!(job = %job.name(), streams = job.streams().len(), "job registered");
        self.jobs.insert(job.name().to_string(), job);
    }

    pub fn get(&self, name: &str) -> Option<Arc<Job>> {
        self.jobs.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Job>> {
        self.jobs.remove(name).map(|(_, job)| job)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Build a job from configuration, returning the producer handles the
/// pipeline side feeds.
pub fn build_job(
    job_config: &JobConfig,
    cache_capacity: usize,
    playlist_config: &PlaylistConfig,
) -> Result<(Arc<Job>, Vec<StreamProducer>)> {
    let mut streams = Vec::with_capacity(job_config.streams.len());
    for stream_config in &job_config.streams {
        let cache = Arc::new(GopCache::new(cache_capacity)?);
        let playlist = job_config
            .playlists
            .then(|| PlaylistWindow::new(playlist_config.version, playlist_config.window_size));
        streams.push(Arc::new(StreamOutput::new(
            stream_config.name.clone(),
            cache,
            playlist,
        )));
    }

    let master_playlist = job_config.playlists.then(|| {
        job_config
            .streams
            .iter()
            .fold(MasterPlaylist::new(playlist_config.version), |master, s| {
                master.add_variant(VariantStream {
                    name: s.name.clone(),
                    bandwidth_kbps: s.bandwidth_kbps,
                })
            })
            .render()
    });

    let producers = streams
        .iter()
        .map(|s| StreamProducer::new(Arc::clone(s), playlist_config.timescale))
        .collect();
    let job = Arc::new(Job::new(job_config.name.clone(), streams, master_playlist));

    Ok((job, producers))
}

/// Build the registry for every job in the configuration. Producer handles
/// are returned per job for the pipeline layer to claim.
pub fn build_registry(config: &Config) -> Result<(Arc<JobRegistry>, Vec<StreamProducer>)> {
    let registry = Arc::new(JobRegistry::new());
    let mut producers = Vec::new();
    for job_config in &config.jobs {
        let (job, job_producers) = build_job(job_config, config.cache.capacity, &config.playlist)?;
        registry.insert(job);
        producers.extend(job_producers);
    }
    Ok((registry, producers))
}

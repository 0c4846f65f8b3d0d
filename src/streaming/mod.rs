//! Protocol logic served against the job registry.
//!
//! The dispatcher resolves each request URI to a job and stream, then
//! drives one of the delivery protocols: an open-ended progressive chunked
//! stream, a single `.ts` segment, or an M3U8 playlist. Sessions reading
//! from a stream hold an access guard on the owning job so supervising
//! code knows the cache is in use.

pub mod playlist;
pub mod progressive;
pub mod response;
pub mod segment;

use crate::server::{try_send, Dispatch, Outcome, Session, SessionStatus};
use crate::state::{AccessGuard, Job, JobRegistry, StreamOutput};
use bytes::Bytes;
use progressive::ProgressiveStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// URI shapes the streaming server answers.
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Crossdomain,
    MasterPlaylist { job: &'a str },
    MediaPlaylist { job: &'a str, stream: &'a str },
    Segment { job: &'a str, stream: &'a str, timestamp: u64 },
    Progressive { job: &'a str, stream: &'a str },
    NotFound,
}

fn route<'a>(path: &'a str, query: &str) -> Route<'a> {
    if path.ends_with("crossdomain.xml") {
        return Route::Crossdomain;
    }
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segments[..] {
        [job, "playlist.m3u8"] => Route::MasterPlaylist { job },
        [job, stream, "playlist.m3u8"] => Route::MediaPlaylist { job, stream },
        [job, stream, name] if name.ends_with(".ts") => match segment::parse_segment_name(name) {
            Some(timestamp) => Route::Segment {
                job,
                stream,
                timestamp,
            },
            None => Route::NotFound,
        },
        // Progressive playback takes no parameters.
        [job, stream] if query.is_empty() && !job.is_empty() && !stream.is_empty() => {
            Route::Progressive { job, stream }
        }
        _ => Route::NotFound,
    }
}

/// A fully assembled response being pushed out.
pub struct StaticResponse {
    buf: Bytes,
    sent: usize,
    /// Keeps the job's active-access count honest for the response
    /// lifetime; `None` for responses that never resolved a stream.
    _access: Option<AccessGuard>,
}

impl StaticResponse {
    fn new(buf: Bytes, access: Option<AccessGuard>) -> Self {
        Self {
            buf,
            sent: 0,
            _access: access,
        }
    }

    fn step(&mut self, io: &TcpStream) -> (Outcome, u64) {
        let before = self.sent;
        match try_send(io, &self.buf, &mut self.sent) {
            Ok(true) => (Outcome::Done, (self.sent - before) as u64),
            Ok(false) if self.sent > before => (
                Outcome::Idle(Duration::from_millis(10)),
                (self.sent - before) as u64,
            ),
            Ok(false) => (Outcome::Block, 0),
            Err(e) => {
                tracing::debug!(error = %e, "socket write failed");
                (Outcome::Done, (self.sent - before) as u64)
            }
        }
    }
}

/// Dispatcher-owned per-session state.
pub enum ProtocolState {
    Static(StaticResponse),
    Progressive(ProgressiveStream),
}

/// Streaming protocol logic behind the event server.
pub struct StreamingDispatcher {
    registry: Arc<JobRegistry>,
}

impl StreamingDispatcher {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve a job and stream by name, taking an access on the job.
    fn resolve(
        &self,
        job_name: &str,
        stream_name: &str,
    ) -> Option<(Arc<Job>, Arc<StreamOutput>, AccessGuard)> {
        let job = self.registry.get(job_name)?;
        let stream = Arc::clone(job.stream(stream_name)?);
        let access = AccessGuard::new(Arc::clone(&job));
        Some((job, stream, access))
    }

    fn build_state(&self, path: &str, query: &str) -> ProtocolState {
        match route(path, query) {
            Route::Crossdomain => ProtocolState::Static(StaticResponse::new(
                response::ok(
                    response::CONTENT_TYPE_XML,
                    response::NO_CACHE,
                    response::CROSSDOMAIN_POLICY.as_bytes(),
                ),
                None,
            )),
            Route::MasterPlaylist { job } => {
                let buf = match self.registry.get(job) {
                    Some(job) => playlist::master_playlist_response(&job),
                    None => response::not_found(),
                };
                ProtocolState::Static(StaticResponse::new(buf, None))
            }
            Route::MediaPlaylist { job, stream } => match self.resolve(job, stream) {
                Some((_job, stream, access)) => {
                    let buf = if stream.cache().is_ready() {
                        playlist::media_playlist_response(&stream)
                    } else {
                        response::not_found()
                    };
                    ProtocolState::Static(StaticResponse::new(buf, Some(access)))
                }
                None => ProtocolState::Static(StaticResponse::new(response::not_found(), None)),
            },
            Route::Segment {
                job,
                stream,
                timestamp,
            } => match self.resolve(job, stream) {
                Some((_job, stream, access)) => {
                    let buf = if stream.cache().is_ready() {
                        segment::segment_response(&stream, timestamp)
                    } else {
                        tracing::debug!(stream = %stream.name(), "stream has no output yet");
                        response::not_found()
                    };
                    ProtocolState::Static(StaticResponse::new(buf, Some(access)))
                }
                None => ProtocolState::Static(StaticResponse::new(response::not_found(), None)),
            },
            Route::Progressive { job, stream } => match self.resolve(job, stream) {
                Some((job, stream, access)) if stream.cache().is_ready() => {
                    tracing::info!(job = %job.name(), stream = %stream.name(), "progressive play");
                    ProtocolState::Progressive(ProgressiveStream::new(stream, access))
                }
                Some((_job, _stream, access)) => {
                    ProtocolState::Static(StaticResponse::new(response::not_found(), Some(access)))
                }
                None => ProtocolState::Static(StaticResponse::new(response::not_found(), None)),
            },
            Route::NotFound => {
                ProtocolState::Static(StaticResponse::new(response::not_found(), None))
            }
        }
    }
}

impl Dispatch for StreamingDispatcher {
    type State = ProtocolState;

    fn dispatch(&self, session: &mut Session<ProtocolState>) -> Outcome {
        if session.status == SessionStatus::Request {
            let (path, query) = match &session.request {
                Some(request) => (request.path.clone(), request.query.clone()),
                None => return Outcome::Done,
            };
            session.protocol = Some(self.build_state(&path, &query));
        }
        drive(session)
    }
}

/// Run one delivery step of whatever protocol the session carries.
fn drive(session: &mut Session<ProtocolState>) -> Outcome {
    let io = match session.io.clone() {
        Some(io) => io,
        None => return Outcome::Done,
    };
    let (outcome, written) = match session.protocol.as_mut() {
        Some(ProtocolState::Static(state)) => state.step(&io),
        Some(ProtocolState::Progressive(state)) => state.step(&io),
        None => (Outcome::Done, 0),
    };
    session.bytes_sent += written;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_playlist_and_segment_uris() {
        assert_eq!(
            route("/demo/playlist.m3u8", ""),
            Route::MasterPlaylist { job: "demo" }
        );
        assert_eq!(
            route("/demo/hd/playlist.m3u8", ""),
            Route::MediaPlaylist {
                job: "demo",
                stream: "hd"
            }
        );
        assert_eq!(
            route("/demo/hd/1422000000.ts", ""),
            Route::Segment {
                job: "demo",
                stream: "hd",
                timestamp: 1_422_000_000
            }
        );
        assert_eq!(
            route("/demo/hd", ""),
            Route::Progressive {
                job: "demo",
                stream: "hd"
            }
        );
    }

    #[test]
    fn progressive_rejects_parameters() {
        assert_eq!(route("/demo/hd", "seek=10"), Route::NotFound);
    }

    #[test]
    fn crossdomain_matches_any_depth() {
        assert_eq!(route("/crossdomain.xml", ""), Route::Crossdomain);
        assert_eq!(route("/demo/crossdomain.xml", ""), Route::Crossdomain);
    }

    #[test]
    fn garbage_uris_fall_through() {
        assert_eq!(route("/", ""), Route::NotFound);
        assert_eq!(route("/demo/hd/not-a-number.ts", ""), Route::NotFound);
        assert_eq!(route("/a/b/c/d", ""), Route::NotFound);
    }
}

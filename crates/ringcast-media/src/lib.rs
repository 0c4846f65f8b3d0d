//! Ringcast-Media: encoder-output GOP cache and HLS playlist primitives
//!
//! This crate provides the in-memory storage side of ringcast. It knows
//! nothing about sockets or HTTP; the server crate drives it.
//!
//! # Modules
//!
//! - `cache` - fixed-capacity circular GOP cache (write, evict, seek, read)
//! - `hls` - M3U8 playlist generation (sliding live window, master playlist)
//!
//! # Architecture
//!
//! The encoder pipeline pushes each encoded buffer through a [`CacheWriter`],
//! which appends it to the stream's [`GopCache`]. The cache holds a
//! continuous run of self-delimited GOP records indexed by their
//! random-access-point addresses; space is reclaimed by evicting the oldest
//! record. HTTP readers seek by timestamp and copy payload ranges out under
//! a bounded lock, so a slow client never stalls the producer.

pub mod cache;
pub mod error;
pub mod hls;

pub use cache::{CacheWriter, ChunkRead, ClosedGop, GopCache, ReadCursor};
pub use error::{Error, Result};
pub use hls::{MasterPlaylist, PlaylistWindow, VariantStream};

//! HLS playlist generation.

mod master;
mod playlist;

pub use master::{MasterPlaylist, VariantStream};
pub use playlist::{PlaylistEntry, PlaylistWindow};

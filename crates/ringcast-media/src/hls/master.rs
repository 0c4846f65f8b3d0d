//! Master playlist: one variant per stream of a job.

use std::fmt::Write;

/// Stream variant advertised by the master playlist.
#[derive(Debug, Clone)]
pub struct VariantStream {
    /// Stream name; the variant URI is `<name>/playlist.m3u8`.
    pub name: String,
    /// Nominal bandwidth in kilobits per second.
    pub bandwidth_kbps: u32,
}

/// Master playlist with one entry per stream variant.
#[derive(Debug, Clone)]
pub struct MasterPlaylist {
    version: u32,
    variants: Vec<VariantStream>,
}

impl MasterPlaylist {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            variants: Vec::new(),
        }
    }

    pub fn add_variant(mut self, variant: VariantStream) -> Self {
        self.variants.push(variant);
        self
    }

    /// Render to an M3U8 string with relative media playlist URIs.
    pub fn render(&self) -> String {
        let mut out = String::new();
        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:{}", self.version).unwrap();
        for variant in &self.variants {
            writeln!(
                out,
                "#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH={}000",
                variant.bandwidth_kbps
            )
            .unwrap();
            writeln!(out, "{}/playlist.m3u8", variant.name).unwrap();
        }
        out
    }
}

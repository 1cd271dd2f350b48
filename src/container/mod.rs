//! WebM output

mod writer;

pub use writer::ContainerWriter;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("output format '{0}' is not available in this FFmpeg build")]
    UnsupportedFormat(&'static str),

    #[error("muxer error: {0}")]
    Muxer(String),

    #[error("container already finalized")]
    Finalized,

    #[error("timestamp {current} precedes previous frame at {previous}")]
    NonMonotonic { previous: i64, current: i64 },
}

impl ContainerError {
    fn muxer(err: ac_ffmpeg::Error) -> Self {
        ContainerError::Muxer(err.to_string())
    }
}

/// (pts in milliseconds, keyframe) of every packet in a WebM file.
#[cfg(test)]
pub(crate) fn demux(path: &std::path::Path) -> Result<Vec<(i64, bool)>, ac_ffmpeg::Error> {
    use ac_ffmpeg::format::demuxer::Demuxer;
    use ac_ffmpeg::format::io::IO;

    let file = std::fs::File::open(path).unwrap();
    let mut demuxer = Demuxer::builder()
        .build(IO::from_seekable_read_stream(file))?
        .find_stream_info(None)
        .map_err(|(_, err)| err)?;

    let mut out = Vec::new();
    // Matroska stream timebase is 1/1000.
    while let Some(packet) = demuxer.take()? {
        out.push((packet.pts().timestamp(), packet.is_key()));
    }
    Ok(out)
}

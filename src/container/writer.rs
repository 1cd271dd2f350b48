use ac_ffmpeg::codec::CodecParameters;
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::format::muxer::{Muxer, OutputFormat};
use log::{debug, trace};
use std::io::{Seek, Write};

use super::ContainerError;
use crate::encoder::Packet;

const FORMAT: &str = "webm";

/// Single-track WebM writer on top of FFmpeg's Matroska muxer.
///
/// The muxer seeks back on close to fill in duration and cues, so the sink
/// must be seekable.
pub struct ContainerWriter<W> {
    muxer: Option<Muxer<W>>,
    last_pts: Option<i64>,
    packets: u64,
}

impl<W: Write + Seek> ContainerWriter<W> {
    /// Write the file header for a stream described by `params`.
    pub fn new(writer: W, params: &CodecParameters) -> Result<Self, ContainerError> {
        let format = OutputFormat::find_by_name(FORMAT).ok_or(ContainerError::UnsupportedFormat(FORMAT))?;

        let mut builder = Muxer::builder();
        builder.add_stream(params).map_err(ContainerError::muxer)?;
        let muxer = builder
            .build(IO::from_seekable_write_stream(writer), format)
            .map_err(ContainerError::muxer)?;
        debug!("Container opened ({})", FORMAT);

        Ok(Self {
            muxer: Some(muxer),
            last_pts: None,
            packets: 0,
        })
    }

    /// Packets written so far.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Append one packet. Timestamps must not go backwards.
    pub fn write_frame(&mut self, packet: Packet) -> Result<(), ContainerError> {
        let muxer = self.muxer.as_mut().ok_or(ContainerError::Finalized)?;

        let pts = packet.pts();
        if let Some(previous) = self.last_pts {
            if pts < previous {
                return Err(ContainerError::NonMonotonic {
                    previous,
                    current: pts,
                });
            }
        }

        trace!("Muxing packet pts={} key={}", pts, packet.is_key());
        muxer
            .push(packet.into_inner().with_stream_index(0))
            .map_err(ContainerError::muxer)?;
        self.last_pts = Some(pts);
        self.packets += 1;
        Ok(())
    }

    /// Flush interleaving buffers and write the trailer.
    pub fn finish(&mut self) -> Result<(), ContainerError> {
        let mut muxer = self.muxer.take().ok_or(ContainerError::Finalized)?;
        muxer.flush().map_err(ContainerError::muxer)?;
        muxer.close().map_err(ContainerError::muxer)?;
        debug!("Container finalized after {} packets", self.packets);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::yuv_convert::I420Image;
    use crate::container::demux;
    use crate::encoder::codec::CodecKind;
    use crate::encoder::ffmpeg::VpxCodec;
    use crate::encoder::TimeBase;
    use std::fs::File;

    const TB: TimeBase = TimeBase::new(1, 25_000);

    fn encode_all(codec: &mut VpxCodec, pts: &[i64]) -> Vec<Packet> {
        let image = I420Image::new(64, 48);
        let mut packets = Vec::new();
        for &p in pts {
            packets.extend(codec.encode(Some(&image), p, 2500).unwrap());
        }
        packets.extend(codec.encode(None, 0, 1).unwrap());
        packets
    }

    #[test]
    fn test_written_file_demuxes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.webm");
        let mut codec = VpxCodec::new(CodecKind::Vp8, 64, 48, TB).unwrap();
        let mut writer = ContainerWriter::new(File::create(&path).unwrap(), &codec.codec_parameters()).unwrap();

        for packet in encode_all(&mut codec, &[0, 2500, 5000]) {
            writer.write_frame(packet).unwrap();
        }
        assert_eq!(writer.packets(), 3);
        writer.finish().unwrap();

        let packets = demux(&path).unwrap();
        let times: Vec<i64> = packets.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![0, 100, 200]);
        assert!(packets[0].1);
    }

    #[test]
    fn test_rejects_timestamps_going_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backwards.webm");
        let mut codec = VpxCodec::new(CodecKind::Vp8, 64, 48, TB).unwrap();
        let mut writer = ContainerWriter::new(File::create(&path).unwrap(), &codec.codec_parameters()).unwrap();

        let mut packets = encode_all(&mut codec, &[0, 2500]);
        let first = packets.remove(0);
        writer.write_frame(packets.remove(0)).unwrap();
        assert!(matches!(
            writer.write_frame(first),
            Err(ContainerError::NonMonotonic { previous: 2500, current: 0 })
        ));
        assert_eq!(writer.packets(), 1);
    }

    #[test]
    fn test_nothing_is_written_after_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final.webm");
        let mut codec = VpxCodec::new(CodecKind::Vp8, 64, 48, TB).unwrap();
        let mut writer = ContainerWriter::new(File::create(&path).unwrap(), &codec.codec_parameters()).unwrap();

        let mut packets = encode_all(&mut codec, &[0]);
        writer.finish().unwrap();
        assert!(matches!(writer.write_frame(packets.remove(0)), Err(ContainerError::Finalized)));
        assert!(matches!(writer.finish(), Err(ContainerError::Finalized)));
    }
}

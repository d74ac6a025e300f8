//! Local file frame sink using FFmpeg.
//!
//! RGB24 frames are converted with swscale and encoded at a fixed rate: frame
//! `n` gets pts `n` in a `1/fps` time base.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::util::format::pixel::Pixel;

use super::file::{FourCc, SinkConfig};
use crate::frame::{Frame, CHANNELS};

pub(crate) struct FfmpegFileSink {
    config: SinkConfig,
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    frame_count: u64,
    finished: bool,
}

/// Codec used for a four-character tag, with the pixel format it is fed.
fn codec_for_tag(tag: FourCc) -> Result<(ffmpeg::codec::Id, Pixel)> {
    match tag.as_str().to_ascii_lowercase().as_str() {
        "mp4v" | "fmp4" | "xvid" | "divx" => Ok((ffmpeg::codec::Id::MPEG4, Pixel::YUV420P)),
        "avc1" | "h264" | "x264" => Ok((ffmpeg::codec::Id::H264, Pixel::YUV420P)),
        "mjpg" => Ok((ffmpeg::codec::Id::MJPEG, Pixel::YUVJ420P)),
        _ => Err(anyhow!("unsupported codec tag '{}'", tag)),
    }
}

impl FfmpegFileSink {
    pub(crate) fn new(config: SinkConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let (codec_id, pixel) = codec_for_tag(config.codec)?;
        let codec = ffmpeg::encoder::find(codec_id)
            .ok_or_else(|| anyhow!("no ffmpeg encoder for codec tag '{}'", config.codec))?;

        let mut output = ffmpeg::format::output(&config.path)
            .with_context(|| format!("failed to open output '{}' with ffmpeg", config.path))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let fps = i32::try_from(config.fps).context("output frame rate out of range")?;
        let encoder_time_base = ffmpeg::Rational::new(1, fps);

        let mut video = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create ffmpeg video encoder")?;
        video.set_width(config.width);
        video.set_height(config.height);
        video.set_format(pixel);
        video.set_time_base(encoder_time_base);
        video.set_frame_rate(Some(ffmpeg::Rational::new(fps, 1)));
        if global_header {
            video.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = video
            .open_as(codec)
            .with_context(|| format!("open encoder for codec tag '{}'", config.codec))?;

        let stream_index = {
            let mut stream = output.add_stream(codec).context("add output video stream")?;
            stream.set_parameters(&encoder);
            stream.set_time_base(encoder_time_base);
            stream.index()
        };

        output
            .write_header()
            .with_context(|| format!("write container header for '{}'", config.path))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .ok_or_else(|| anyhow!("output stream disappeared after header"))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            Pixel::RGB24,
            config.width,
            config.height,
            pixel,
            config.width,
            config.height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "VideoSink: writing {} (ffmpeg {} {}x{} @ {} fps)",
            config.path,
            config.codec,
            config.width,
            config.height,
            config.fps
        );

        Ok(Self {
            config,
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            frame_count: 0,
            finished: false,
        })
    }

    pub(crate) fn frames_written(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn write(&mut self, frame: &Frame) -> Result<()> {
        if self.finished {
            return Err(anyhow!("write after finish"));
        }
        if frame.dimensions() != (self.config.width, self.config.height) {
            return Err(anyhow!(
                "frame is {}x{}, sink expects {}x{}",
                frame.width,
                frame.height,
                self.config.width,
                self.config.height
            ));
        }

        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, frame.width, frame.height);
        let row_bytes = frame.width as usize * CHANNELS;
        let stride = rgb.stride(0);
        let src = frame.as_bytes();
        let dst = rgb.data_mut(0);
        for (row, chunk) in src.chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            dst.get_mut(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?
                .copy_from_slice(chunk);
        }

        let mut converted = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut converted)
            .context("convert frame from RGB")?;
        converted.set_pts(Some(self.frame_count as i64));

        self.encoder
            .send_frame(&converted)
            .context("send frame to ffmpeg encoder")?;
        self.frame_count += 1;
        self.drain_packets()
    }

    pub(crate) fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.encoder.send_eof().context("flush ffmpeg encoder")?;
        self.drain_packets()?;
        self.output
            .write_trailer()
            .with_context(|| format!("write container trailer for '{}'", self.config.path))?;
        log::info!(
            "VideoSink: finished {} ({} frames)",
            self.config.path,
            self.frame_count
        );
        Ok(())
    }

    fn drain_packets(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write encoded packet")?;
        }
        Ok(())
    }
}

impl Drop for FfmpegFileSink {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!(
                "VideoSink: {} dropped before finish; output is incomplete",
                self.config.path
            );
        }
    }
}

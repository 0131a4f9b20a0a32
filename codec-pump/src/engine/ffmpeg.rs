//! `CodecEngine` over libavcodec through `ffmpeg-next`.

use ffmpeg_next::codec::{self, Parameters};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::util::error::EAGAIN;
use ffmpeg_next::{Dictionary, Rational, frame};

use crate::engine::{CodecEngine, CodecKind, CodecOptions, Produce, Submit, WorkItem};
use crate::error::{EngineError, INVALID_DATA};

/// A decoded frame or a frame to encode.
pub enum AvFrame {
    Video(frame::Video),
    Audio(frame::Audio),
}

pub type AvPacket = ffmpeg_next::Packet;

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: Pixel,
    pub time_base: Rational,
    pub frame_rate: Option<Rational>,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            width: 1920,
            height: 1080,
            pixel_format: Pixel::YUV420P,
            time_base: Rational::new(1, 25),
            frame_rate: Some(Rational::new(25, 1)),
        }
    }
}

pub enum FfmpegDescriptor {
    /// Decoder built from a demuxed stream's codec parameters.
    Decode(Parameters),
    Encode(EncoderSettings),
}

enum Inner {
    VideoDecoder(codec::decoder::Video),
    AudioDecoder(codec::decoder::Audio),
    VideoEncoder(codec::encoder::Video),
}

pub struct FfmpegCodec {
    inner: Inner,
}

fn engine_error(e: ffmpeg_next::Error) -> EngineError {
    EngineError::new(i32::from(e), e.to_string())
}

fn dictionary(options: &CodecOptions) -> Dictionary<'static> {
    let mut dict = Dictionary::new();
    for (key, value) in options.iter() {
        dict.set(key, value);
    }
    dict
}

fn submitted(result: Result<(), ffmpeg_next::Error>) -> Submit {
    match result {
        Ok(()) => Submit::Accepted,
        Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => Submit::WouldBlock,
        Err(e) => Submit::Error(engine_error(e)),
    }
}

fn produced(result: Result<(), ffmpeg_next::Error>) -> Produce {
    match result {
        Ok(()) => Produce::Ready,
        Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => Produce::NoOutput,
        Err(ffmpeg_next::Error::Eof) => Produce::EndOfStream,
        Err(e) => Produce::Error(engine_error(e)),
    }
}

impl FfmpegCodec {
    fn open_decoder(parameters: &Parameters, options: &CodecOptions) -> Result<Inner, EngineError> {
        let codec = ffmpeg_next::decoder::find(parameters.id()).ok_or_else(|| {
            EngineError::invalid_argument(format!("decoder not found: {:?}", parameters.id()))
        })?;
        let context = codec::Context::from_parameters(parameters.clone()).map_err(engine_error)?;
        let opened = context
            .decoder()
            .open_as_with(codec, dictionary(options))
            .map_err(engine_error)?;

        match opened.medium() {
            ffmpeg_next::media::Type::Video => {
                let decoder = opened.video().map_err(engine_error)?;
                if decoder.format() == Pixel::None || decoder.width() == 0 || decoder.height() == 0
                {
                    return Err(EngineError::invalid_argument("missing codec parameters"));
                }
                Ok(Inner::VideoDecoder(decoder))
            }
            ffmpeg_next::media::Type::Audio => {
                Ok(Inner::AudioDecoder(opened.audio().map_err(engine_error)?))
            }
            other => Err(EngineError::unsupported(format!(
                "unsupported stream type: {:?}",
                other
            ))),
        }
    }

    fn open_encoder(settings: &EncoderSettings, options: &CodecOptions) -> Result<Inner, EngineError> {
        let codec = ffmpeg_next::encoder::find_by_name(&settings.codec).ok_or_else(|| {
            EngineError::invalid_argument(format!("encoder not found: {}", settings.codec))
        })?;
        let mut encoder = codec::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(engine_error)?;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(settings.pixel_format);
        encoder.set_time_base(settings.time_base);
        encoder.set_frame_rate(settings.frame_rate);

        let mut dict = dictionary(options);
        if options.is_empty() {
            dict.set("preset", "ultrafast");
            dict.set("tune", "zerolatency");
        }
        let encoder = encoder.open_with(dict).map_err(engine_error)?;
        log::info!("encoder opened: {}", settings.codec);
        Ok(Inner::VideoEncoder(encoder))
    }
}

impl CodecEngine for FfmpegCodec {
    type Frame = AvFrame;
    type Packet = AvPacket;
    type Descriptor = FfmpegDescriptor;

    fn open(descriptor: &FfmpegDescriptor, options: &CodecOptions) -> Result<Self, EngineError> {
        let inner = match descriptor {
            FfmpegDescriptor::Decode(parameters) => Self::open_decoder(parameters, options)?,
            FfmpegDescriptor::Encode(settings) => Self::open_encoder(settings, options)?,
        };
        Ok(Self { inner })
    }

    fn kind(&self) -> CodecKind {
        match self.inner {
            Inner::VideoDecoder(_) | Inner::AudioDecoder(_) => CodecKind::Decoder,
            Inner::VideoEncoder(_) => CodecKind::Encoder,
        }
    }

    fn submit(&mut self, item: &WorkItem<AvFrame, AvPacket>) -> Submit {
        let kind = self.kind();
        match (&mut self.inner, item) {
            (Inner::VideoDecoder(decoder), WorkItem::Packet(packet)) => {
                submitted(decoder.send_packet(packet))
            }
            (Inner::AudioDecoder(decoder), WorkItem::Packet(packet)) => {
                submitted(decoder.send_packet(packet))
            }
            (Inner::VideoEncoder(encoder), WorkItem::Frame(AvFrame::Video(frame))) => {
                submitted(encoder.send_frame(frame))
            }
            (Inner::VideoDecoder(decoder), WorkItem::Flush) => submitted(decoder.send_eof()),
            (Inner::AudioDecoder(decoder), WorkItem::Flush) => submitted(decoder.send_eof()),
            (Inner::VideoEncoder(encoder), WorkItem::Flush) => submitted(encoder.send_eof()),
            (_, item) => Submit::Error(EngineError::invalid_argument(format!(
                "{} does not accept this {}",
                kind,
                item.label()
            ))),
        }
    }

    fn produce_frame(&mut self, out: &mut AvFrame) -> Produce {
        match &mut self.inner {
            Inner::VideoDecoder(decoder) => {
                if !matches!(out, AvFrame::Video(_)) {
                    *out = AvFrame::Video(frame::Video::empty());
                }
                match out {
                    AvFrame::Video(frame) => produced(decoder.receive_frame(frame)),
                    AvFrame::Audio(_) => Produce::NoOutput,
                }
            }
            Inner::AudioDecoder(decoder) => {
                if !matches!(out, AvFrame::Audio(_)) {
                    *out = AvFrame::Audio(frame::Audio::empty());
                }
                match out {
                    AvFrame::Audio(frame) => produced(decoder.receive_frame(frame)),
                    AvFrame::Video(_) => Produce::NoOutput,
                }
            }
            Inner::VideoEncoder(_) => {
                Produce::Error(EngineError::invalid_argument("encoder produces packets"))
            }
        }
    }

    fn produce_packet(&mut self, packet: &mut AvPacket) -> Produce {
        match &mut self.inner {
            Inner::VideoEncoder(encoder) => produced(encoder.receive_packet(packet)),
            _ => Produce::Error(EngineError::invalid_argument("decoder produces frames")),
        }
    }

    fn alloc_frame(&self) -> AvFrame {
        match self.inner {
            Inner::AudioDecoder(_) => AvFrame::Audio(frame::Audio::empty()),
            _ => AvFrame::Video(frame::Video::empty()),
        }
    }

    fn alloc_packet(&self) -> AvPacket {
        AvPacket::empty()
    }

    /// A corrupt packet in a decoder should not hold back the ones after it.
    fn continue_after_error(&self, error: &EngineError) -> bool {
        self.kind() == CodecKind::Decoder && error.code == INVALID_DATA
    }
}

//! Built-in "rawvideo" engine: payloads pass through unchanged.
//!
//! The decoder turns each packet into one frame, the encoder each frame into
//! one packet. A bounded internal FIFO gives it real backpressure.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::engine::{CodecEngine, CodecKind, CodecOptions, Produce, Submit, WorkItem};
use crate::error::EngineError;
use crate::frame::VideoFrame;
use crate::packet::Packet;

pub const DEFAULT_CAPACITY: usize = 4;
pub const DEFAULT_GOP: u64 = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDescriptor {
    pub kind: CodecKind,
    pub width: u32,
    pub height: u32,
    /// Expected payload size in bytes; 0 accepts any size.
    pub frame_size: usize,
}

impl RawDescriptor {
    pub fn decoder(width: u32, height: u32) -> Self {
        Self {
            kind: CodecKind::Decoder,
            width,
            height,
            frame_size: 0,
        }
    }

    pub fn encoder(width: u32, height: u32) -> Self {
        Self {
            kind: CodecKind::Encoder,
            ..Self::decoder(width, height)
        }
    }

    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }
}

struct Pending {
    data: Bytes,
    pts: Option<i64>,
    is_key: bool,
}

pub struct RawCodec {
    desc: RawDescriptor,
    capacity: usize,
    gop: u64,
    pending: VecDeque<Pending>,
    encoded: u64,
    draining: bool,
}

impl RawCodec {
    pub fn descriptor(&self) -> &RawDescriptor {
        &self.desc
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn check_size(&self, len: usize) -> Result<(), EngineError> {
        if self.desc.frame_size != 0 && len != self.desc.frame_size {
            return Err(EngineError::invalid_data(format!(
                "payload is {} bytes, expected {}",
                len, self.desc.frame_size
            )));
        }
        Ok(())
    }

    fn push(&mut self, pending: Pending) -> Submit {
        if self.pending.len() >= self.capacity {
            return Submit::WouldBlock;
        }
        self.pending.push_back(pending);
        self.draining = false;
        Submit::Accepted
    }

    fn pop(&mut self) -> Result<Pending, Produce> {
        match self.pending.pop_front() {
            Some(pending) => Ok(pending),
            None if self.draining => Err(Produce::EndOfStream),
            None => Err(Produce::NoOutput),
        }
    }
}

impl CodecEngine for RawCodec {
    type Frame = VideoFrame;
    type Packet = Packet;
    type Descriptor = RawDescriptor;

    fn open(descriptor: &RawDescriptor, options: &CodecOptions) -> Result<Self, EngineError> {
        let capacity = options.parse_or("capacity", DEFAULT_CAPACITY)?;
        if capacity == 0 {
            return Err(EngineError::invalid_argument("capacity must be positive"));
        }
        let gop = options.parse_or("gop", DEFAULT_GOP)?;
        if gop == 0 {
            return Err(EngineError::invalid_argument("gop must be positive"));
        }
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(EngineError::invalid_argument(format!(
                "invalid dimensions {}x{}",
                descriptor.width, descriptor.height
            )));
        }
        Ok(Self {
            desc: descriptor.clone(),
            capacity,
            gop,
            pending: VecDeque::with_capacity(capacity),
            encoded: 0,
            draining: false,
        })
    }

    fn kind(&self) -> CodecKind {
        self.desc.kind
    }

    fn submit(&mut self, item: &WorkItem<VideoFrame, Packet>) -> Submit {
        match (self.desc.kind, item) {
            (_, WorkItem::Flush) => {
                self.draining = true;
                Submit::Accepted
            }
            (CodecKind::Decoder, WorkItem::Packet(packet)) => {
                if let Err(e) = self.check_size(packet.size()) {
                    return Submit::Error(e);
                }
                self.push(Pending {
                    data: packet.bytes(),
                    pts: packet.pts,
                    is_key: packet.is_key,
                })
            }
            (CodecKind::Encoder, WorkItem::Frame(frame)) => {
                if frame.width != self.desc.width || frame.height != self.desc.height {
                    return Submit::Error(EngineError::invalid_data(format!(
                        "frame is {}x{}, expected {}x{}",
                        frame.width, frame.height, self.desc.width, self.desc.height
                    )));
                }
                if let Err(e) = self.check_size(frame.size()) {
                    return Submit::Error(e);
                }
                self.push(Pending {
                    data: frame.bytes(),
                    pts: frame.pts,
                    is_key: false,
                })
            }
            (kind, item) => Submit::Error(EngineError::invalid_argument(format!(
                "{} does not accept a {}",
                kind,
                item.label()
            ))),
        }
    }

    fn produce_frame(&mut self, frame: &mut VideoFrame) -> Produce {
        if self.desc.kind != CodecKind::Decoder {
            return Produce::Error(EngineError::invalid_argument("encoder produces packets"));
        }
        match self.pop() {
            Ok(pending) => {
                frame.fill(&pending.data, self.desc.width, self.desc.height, pending.pts);
                frame.is_key = pending.is_key;
                Produce::Ready
            }
            Err(outcome) => outcome,
        }
    }

    fn produce_packet(&mut self, packet: &mut Packet) -> Produce {
        if self.desc.kind != CodecKind::Encoder {
            return Produce::Error(EngineError::invalid_argument("decoder produces frames"));
        }
        match self.pop() {
            Ok(pending) => {
                let is_key = self.encoded % self.gop == 0;
                self.encoded += 1;
                packet.fill(&pending.data, pending.pts, pending.pts, is_key);
                Produce::Ready
            }
            Err(outcome) => outcome,
        }
    }

    fn alloc_frame(&self) -> VideoFrame {
        VideoFrame {
            width: self.desc.width,
            height: self.desc.height,
            ..Default::default()
        }
    }

    fn alloc_packet(&self) -> Packet {
        Packet::default()
    }

    fn close(&mut self) {
        if !self.pending.is_empty() {
            log::debug!("raw {} closed with {} pending unit(s)", self.desc.kind, self.pending.len());
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EINVAL, INVALID_DATA};

    fn open(desc: RawDescriptor, options: &CodecOptions) -> RawCodec {
        RawCodec::open(&desc, options).unwrap()
    }

    #[test]
    fn test_decoder_passes_payload_through() {
        let mut codec = open(RawDescriptor::decoder(4, 2), &CodecOptions::new());
        let packet = Packet::new(b"abcdefgh", Some(40)).with_key(true);
        assert_eq!(codec.submit(&WorkItem::Packet(packet)), Submit::Accepted);

        let mut frame = codec.alloc_frame();
        assert_eq!(codec.produce_frame(&mut frame), Produce::Ready);
        assert_eq!(&frame.data[..], b"abcdefgh");
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.pts, Some(40));
        assert!(frame.is_key);
        assert_eq!(codec.produce_frame(&mut frame), Produce::NoOutput);
    }

    #[test]
    fn test_full_fifo_would_block() {
        let options = CodecOptions::new().with("capacity", 2);
        let mut codec = open(RawDescriptor::decoder(2, 2), &options);
        for pts in 0..2 {
            let item = WorkItem::Packet(Packet::new(b"xx", Some(pts)));
            assert_eq!(codec.submit(&item), Submit::Accepted);
        }
        let item = WorkItem::Packet(Packet::new(b"xx", Some(2)));
        assert_eq!(codec.submit(&item), Submit::WouldBlock);

        let mut frame = codec.alloc_frame();
        assert_eq!(codec.produce_frame(&mut frame), Produce::Ready);
        assert_eq!(codec.submit(&item), Submit::Accepted);
    }

    #[test]
    fn test_bad_size_and_wrong_unit_are_errors() {
        let desc = RawDescriptor::decoder(2, 2).with_frame_size(4);
        let mut codec = open(desc, &CodecOptions::new());

        let short = WorkItem::Packet(Packet::new(b"abc", None));
        match codec.submit(&short) {
            Submit::Error(e) => assert_eq!(e.code, INVALID_DATA),
            other => panic!("unexpected {:?}", other),
        }

        let frame = WorkItem::Frame(VideoFrame::new(b"abcd", 2, 2, None));
        match codec.submit(&frame) {
            Submit::Error(e) => assert_eq!(e.code, EINVAL),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_encoder_marks_keyframes_by_gop() {
        let options = CodecOptions::new().with("gop", 2).with("capacity", 8);
        let mut codec = open(RawDescriptor::encoder(1, 1), &options);
        for pts in 0..4 {
            let item = WorkItem::Frame(VideoFrame::new(b"p", 1, 1, Some(pts)));
            assert_eq!(codec.submit(&item), Submit::Accepted);
        }

        let mut keys = Vec::new();
        let mut packet = codec.alloc_packet();
        while codec.produce_packet(&mut packet) == Produce::Ready {
            assert_eq!(packet.dts, packet.pts);
            keys.push(packet.is_key);
        }
        assert_eq!(keys, vec![true, false, true, false]);
    }

    #[test]
    fn test_flush_reports_end_of_stream_once_drained() {
        let mut codec = open(RawDescriptor::decoder(1, 1), &CodecOptions::new());
        codec.submit(&WorkItem::Packet(Packet::new(b"a", Some(0))));
        assert_eq!(codec.submit(&WorkItem::Flush), Submit::Accepted);

        let mut frame = codec.alloc_frame();
        assert_eq!(codec.produce_frame(&mut frame), Produce::Ready);
        assert_eq!(codec.produce_frame(&mut frame), Produce::EndOfStream);
    }

    #[test]
    fn test_open_rejects_bad_options() {
        let desc = RawDescriptor::decoder(2, 2);
        let bad = CodecOptions::new().with("capacity", "lots");
        assert_eq!(RawCodec::open(&desc, &bad).err().map(|e| e.code), Some(EINVAL));

        let zero = CodecOptions::new().with("gop", 0);
        assert!(RawCodec::open(&desc, &zero).is_err());
        assert!(RawCodec::open(&RawDescriptor::decoder(0, 2), &CodecOptions::new()).is_err());
    }
}

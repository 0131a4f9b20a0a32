use std::fmt::{Display, Formatter};

use bytes::{Bytes, BytesMut};

/// A raw (decoded) video frame. Payload layout is opaque to the pump.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub data: BytesMut,
    pub width: u32,
    pub height: u32,
    pub pts: Option<i64>,
    pub is_key: bool,
}

impl VideoFrame {
    pub fn new(data: &[u8], width: u32, height: u32, pts: Option<i64>) -> Self {
        Self {
            data: BytesMut::from(data),
            width,
            height,
            pts,
            is_key: false,
        }
    }

    /// Overwrites this frame in place, keeping the payload allocation.
    pub fn fill(&mut self, data: &[u8], width: u32, height: u32, pts: Option<i64>) {
        self.data.clear();
        self.data.extend_from_slice(data);
        self.width = width;
        self.height = height;
        self.pts = pts;
        self.is_key = false;
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }
}

impl Display for VideoFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "VideoFrame data_len: {}, width: {}, height: {}, pts: {:?}, is_key: {}",
            self.data.len(),
            self.width,
            self.height,
            self.pts,
            self.is_key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::VideoFrame;

    #[test]
    fn test_fill_reuses_allocation_and_resets_key() {
        let mut frame = VideoFrame::new(&[0u8; 64], 8, 8, Some(1));
        frame.is_key = true;
        let capacity = frame.data.capacity();

        frame.fill(&[1u8; 16], 4, 4, Some(i64::MAX / 2));
        assert_eq!(frame.size(), 16);
        assert_eq!(frame.data.capacity(), capacity);
        assert_eq!((frame.width, frame.height), (4, 4));
        assert_eq!(frame.pts, Some(i64::MAX / 2));
        assert!(!frame.is_key);
        assert_eq!(
            frame.to_string(),
            format!("VideoFrame data_len: 16, width: 4, height: 4, pts: Some({}), is_key: false", i64::MAX / 2)
        );
    }
}

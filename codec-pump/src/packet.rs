use std::fmt::{Display, Formatter};

use bytes::{Bytes, BytesMut};

/// A coded packet. The pump never looks inside the payload.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: BytesMut,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub is_key: bool,
}

impl Packet {
    pub fn new(data: &[u8], pts: Option<i64>) -> Self {
        Self {
            data: BytesMut::from(data),
            pts,
            dts: pts,
            ..Default::default()
        }
    }

    pub fn with_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    /// Overwrites this packet in place, keeping the payload allocation.
    pub fn fill(&mut self, data: &[u8], pts: Option<i64>, dts: Option<i64>, is_key: bool) {
        self.data.clear();
        self.data.extend_from_slice(data);
        self.pts = pts;
        self.dts = dts;
        self.is_key = is_key;
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "Packet data_len: {}, pts: {:?}, dts: {:?}, is_key: {}",
            self.data.len(),
            self.pts,
            self.dts,
            self.is_key
        )
    }
}

use bytes::{BufMut, Bytes, BytesMut};

pub const BUFFER_VIEW_ALIGNMENT: usize = 4;

/// Append-only byte buffer shared by every buffer view of one scene.
#[derive(Debug, Default)]
pub struct BinaryBuffer {
    data: BytesMut,
}

impl BinaryBuffer {
    pub fn new() -> Self {
        BinaryBuffer {
            data: BytesMut::with_capacity(64 * 1024),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends `bytes` on a 4-byte boundary and returns their offset.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        self.pad_to(BUFFER_VIEW_ALIGNMENT);
        let offset = self.data.len();
        self.data.put_slice(bytes);
        offset
    }

    pub fn pad_to(&mut self, alignment: usize) {
        let rem = self.data.len() % alignment;
        if rem != 0 {
            self.data.put_bytes(0, alignment - rem);
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn freeze(mut self) -> Bytes {
        self.pad_to(BUFFER_VIEW_ALIGNMENT);
        self.data.freeze()
    }
}

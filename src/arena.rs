use crate::error::ConvertError;

/// Append-only output buffer for one conversion. Tables whose contents are
/// only known later are reserved up front and back-patched through a
/// [`Reserved`] handle; writes outside a reservation are rejected so an
/// internal sizing bug surfaces as `BufferOverrun` instead of corrupting a
/// neighbouring table.
#[derive(Debug, Default)]
pub struct Arena {
    buf: Vec<u8>,
}

/// A placeholder region handed out by [`Arena::reserve`].
#[derive(Debug, Clone, Copy)]
pub struct Reserved {
    start: usize,
    len: usize,
    table: &'static str,
}

impl Reserved {
    #[must_use]
    pub fn start(&self) -> u32 {
        self.start as u32
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Arena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pos(&self) -> u32 {
        self.buf.len() as u32
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn fill(&mut self, len: usize, byte: u8) {
        self.buf.resize(self.buf.len() + len, byte);
    }

    pub fn align_to(&mut self, align: usize, byte: u8) {
        let rem = self.buf.len() % align;
        if rem != 0 {
            self.fill(align - rem, byte);
        }
    }

    pub fn reserve(&mut self, len: usize, table: &'static str) -> Reserved {
        let start = self.buf.len();
        self.fill(len, 0);
        Reserved { start, len, table }
    }

    /// Back-patches `bytes` at `at` bytes into the reservation.
    pub fn patch(
        &mut self,
        region: &Reserved,
        at: usize,
        bytes: &[u8],
    ) -> Result<(), ConvertError> {
        if at + bytes.len() > region.len {
            return Err(ConvertError::BufferOverrun {
                table: region.table,
                at,
            });
        }
        self.buf[region.start + at..region.start + at + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn patch_u32(&mut self, region: &Reserved, at: usize, value: u32) -> Result<(), ConvertError> {
        self.patch(region, at, &value.to_le_bytes())
    }

    /// Overwrites four already-allocated bytes. Used for zeroing converted
    /// relocation placeholders inside segment data.
    pub fn overwrite_u32(&mut self, offset: usize, value: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

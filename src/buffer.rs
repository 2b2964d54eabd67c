//! An immutable byte blob with a persistent overlay of point edits.
//!
//! Writes never touch the base allocation; each successor buffer shares the
//! base and carries the edits made so far. Cloning a buffer therefore costs
//! in proportion to the edit count, not the blob size, which is what makes
//! interpreter snapshots cheap enough to keep a history of.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};

#[derive(Clone, PartialEq)]
pub struct ByteBuffer {
    base: Arc<[u8]>,
    edits: IndexMap<usize, u8>,
}

impl ByteBuffer {
    pub fn new(base: impl Into<Arc<[u8]>>) -> ByteBuffer {
        ByteBuffer {
            base: base.into(),
            edits: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// How many addresses differ from the base blob.
    pub fn edit_count(&self) -> usize {
        self.edits.len()
    }

    /// Read one byte; edits shadow the base.
    pub fn read_byte(&self, addr: usize) -> Result<u8> {
        if addr >= self.base.len() {
            return Err(Error::AddressOutOfRange(addr));
        }
        Ok(self.edits.get(&addr).copied().unwrap_or(self.base[addr]))
    }

    /// Produce a successor buffer with one byte changed. The receiver is
    /// left untouched and stays readable.
    pub fn write_byte(&self, addr: usize, value: u8) -> Result<ByteBuffer> {
        if addr >= self.base.len() {
            return Err(Error::AddressOutOfRange(addr));
        }
        let mut edits = self.edits.clone();
        edits.insert(addr, value);
        Ok(ByteBuffer {
            base: Arc::clone(&self.base),
            edits,
        })
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.base.len())
            .field("edits", &self.edits.len())
            .finish()
    }
}

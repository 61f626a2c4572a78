//! Append-only byte store shared by one writer and many read cursors.
//!
//! A [`SharedBuffer`] only ever grows. Each [`BufferCursor`] keeps its own
//! offset into the same backing storage, so growth after the cursor was
//! created is visible to it without copying.

use std::io;
use std::sync::{Arc, RwLock};

use bytes::Bytes;

/// Growable byte store. Cloning shares the storage.
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer {
    data: Arc<RwLock<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` under the exclusive lock.
    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut data = self.data.write().expect("shared buffer lock");
        data.extend_from_slice(bytes);
    }

    /// Total bytes appended so far.
    pub fn len(&self) -> usize {
        self.data.read().expect("shared buffer lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the full history.
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data.read().expect("shared buffer lock"))
    }

    /// A cursor starting at the beginning of the history.
    pub fn fork(&self) -> BufferCursor {
        self.fork_at(0)
    }

    /// A cursor starting at `offset`.
    pub fn fork_at(&self, offset: usize) -> BufferCursor {
        BufferCursor {
            data: Arc::clone(&self.data),
            offset,
        }
    }
}

/// Independent read position over a [`SharedBuffer`].
///
/// Reading follows the [`io::Read`] contract: `Ok(0)` for a non-empty
/// destination means the cursor has caught up with everything written so
/// far. An empty destination also yields `Ok(0)` and says nothing about
/// whether bytes remain; use [`BufferCursor::remaining`] for that.
#[derive(Debug)]
pub struct BufferCursor {
    data: Arc<RwLock<Vec<u8>>>,
    offset: usize,
}

impl BufferCursor {
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes written but not yet read by this cursor.
    pub fn remaining(&self) -> usize {
        let data = self.data.read().expect("shared buffer lock");
        data.len().saturating_sub(self.offset)
    }

    /// Copy of the unread bytes. Does not advance the cursor.
    pub fn unread(&self) -> Bytes {
        let data = self.data.read().expect("shared buffer lock");
        match data.get(self.offset..) {
            Some(unread) => Bytes::copy_from_slice(unread),
            None => Bytes::new(),
        }
    }

    /// A new cursor over the same storage, rewound to the start.
    pub fn fork(&self) -> BufferCursor {
        BufferCursor {
            data: Arc::clone(&self.data),
            offset: 0,
        }
    }

    /// Copy as many unread bytes as fit into `dest` and advance.
    pub fn read_into(&mut self, dest: &mut [u8]) -> usize {
        if dest.is_empty() {
            return 0;
        }
        let data = self.data.read().expect("shared buffer lock");
        let Some(unread) = data.get(self.offset..) else {
            return 0;
        };
        let n = unread.len().min(dest.len());
        dest[..n].copy_from_slice(&unread[..n]);
        self.offset += n;
        n
    }
}

impl io::Read for BufferCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf))
    }
}

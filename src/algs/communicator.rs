//! Thin façade over point-to-point message passing between partitions.
//!
//! Messages are contiguous byte slices. Sends are buffered and complete
//! immediately; receive handles are waitable and block in `wait()` until a
//! matching message arrives. Messages between the same `(src, dst, tag)`
//! triple are delivered in send order.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Non-blocking communication interface.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait + Send;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait + Send;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of at most `len` bytes.
    fn irecv(&self, peer: usize, tag: u16, len: usize) -> Self::RecvHandle;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Single-partition communicator; nothing is ever exchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _len: usize) {}
}

// (src, dst, tag)
type Key = (usize, usize, u16);
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

/// Intra-process communicator: one instance per simulated partition, all
/// sharing a mailbox. Run each rank on its own thread.
#[derive(Clone, Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl ThreadComm {
    /// Communicators for ranks `0..size`, connected to each other.
    pub fn universe(size: usize) -> Vec<ThreadComm> {
        let mailbox = Arc::new(Mailbox::new());
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }
}

/// Pending receive on a [`ThreadComm`].
#[derive(Debug)]
pub struct LocalHandle {
    key: Key,
    len: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalHandle {
    fn try_take(&self) -> Option<Bytes> {
        let mut queue = self.mailbox.get_mut(&self.key)?;
        queue.pop_front()
    }
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            // The shard guard is released before yielding.
            if let Some(bytes) = self.try_take() {
                let n = bytes.len().min(self.len);
                return Some(bytes[..n].to_vec());
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        self.mailbox
            .entry((self.rank, peer, tag))
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, len: usize) -> LocalHandle {
        LocalHandle {
            key: (peer, self.rank, tag),
            len,
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

static_assertions::assert_impl_all!(ThreadComm: Send, Sync, Clone);
static_assertions::assert_impl_all!(LocalHandle: Send);

//! Communication disciplines for coupled-patch exchange.
//!
//! [`PatchExchange`] wraps a [`Communicator`] and adds the bookkeeping the
//! boundary-field evaluation needs: a global outstanding-request list that
//! can be waited on from a recorded position, and the selected
//! [`CommsType`].

use crate::algs::communicator::{Communicator, NoComm, Wait};
use crate::mesh_error::MeshError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How coupled patches exchange data during evaluation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommsType {
    /// Every send completes before the matching evaluation receives.
    Blocking,
    /// Receives are posted during initialisation and awaited in one batch.
    #[default]
    NonBlocking,
    /// Patches are visited in the mesh's precomputed schedule order.
    Scheduled,
}

impl CommsType {
    pub fn name(self) -> &'static str {
        match self {
            CommsType::Blocking => "blocking",
            CommsType::NonBlocking => "nonBlocking",
            CommsType::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for CommsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CommsType {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocking" => Ok(CommsType::Blocking),
            "nonBlocking" | "nonblocking" => Ok(CommsType::NonBlocking),
            "scheduled" => Ok(CommsType::Scheduled),
            other => Err(MeshError::UnsupportedCommsType(other.to_string())),
        }
    }
}

/// Parallel run settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParallelConfig {
    pub comms_type: CommsType,
}

impl ParallelConfig {
    /// Environment variable overriding the default discipline.
    pub const COMMS_TYPE_VAR: &'static str = "MESH_COMMS_TYPE";

    /// Defaults, overridden by `MESH_COMMS_TYPE` when set.
    pub fn from_env() -> Result<Self, MeshError> {
        match std::env::var(Self::COMMS_TYPE_VAR) {
            Ok(v) => Ok(Self {
                comms_type: v.trim().parse()?,
            }),
            Err(_) => Ok(Self::default()),
        }
    }
}

/// Index into the outstanding-request list of an [`Exchange`].
pub type RequestId = usize;

/// Object-safe view of a partition's communication context, as seen by
/// patch fields.
pub trait Exchange: Send + Sync {
    fn comms_type(&self) -> CommsType;
    fn rank(&self) -> usize;
    /// More than one partition takes part in the run.
    fn is_parallel(&self) -> bool;

    /// Buffered send; returns once `buf` may be reused.
    fn send(&self, peer: usize, tag: u16, buf: &[u8]);
    /// Post a receive and record it as outstanding.
    fn post_recv(&self, peer: usize, tag: u16, len: usize) -> RequestId;
    /// Receive immediately, blocking until the message arrives.
    fn recv(&self, peer: usize, tag: u16, len: usize) -> Result<Vec<u8>, MeshError>;
    /// Data of a posted receive, waiting for it first if needed.
    fn take_request(&self, id: RequestId) -> Result<Vec<u8>, MeshError>;

    /// Outstanding-request count; a position for [`Exchange::wait_requests`].
    fn n_requests(&self) -> usize;
    /// Complete every request posted at or after `start`.
    fn wait_requests(&self, start: usize) -> Result<(), MeshError>;
}

enum Request<H> {
    Pending { peer: usize, handle: H },
    Ready { peer: usize, data: Option<Vec<u8>> },
}

struct State<C: Communicator> {
    requests: Vec<Request<C::RecvHandle>>,
    sends: Vec<C::SendHandle>,
}

/// [`Exchange`] over any [`Communicator`].
pub struct PatchExchange<C: Communicator> {
    comm: C,
    comms_type: CommsType,
    state: Mutex<State<C>>,
}

impl PatchExchange<NoComm> {
    /// Exchange for a single partition.
    pub fn serial(comms_type: CommsType) -> Self {
        Self::new(NoComm, comms_type)
    }
}

impl<C: Communicator> PatchExchange<C> {
    pub fn new(comm: C, comms_type: CommsType) -> Self {
        Self {
            comm,
            comms_type,
            state: Mutex::new(State {
                requests: Vec::new(),
                sends: Vec::new(),
            }),
        }
    }

    pub fn from_config(comm: C, config: &ParallelConfig) -> Self {
        Self::new(comm, config.comms_type)
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn set_comms_type(&mut self, comms_type: CommsType) {
        self.comms_type = comms_type;
    }

    fn complete(peer: usize, handle: C::RecvHandle) -> Result<Vec<u8>, MeshError> {
        handle.wait().ok_or_else(|| MeshError::CommError {
            neighbor: peer,
            message: "receive completed without data".into(),
        })
    }
}

impl<C: Communicator> Exchange for PatchExchange<C> {
    fn comms_type(&self) -> CommsType {
        self.comms_type
    }

    fn rank(&self) -> usize {
        self.comm.rank()
    }

    fn is_parallel(&self) -> bool {
        self.comm.size() > 1
    }

    fn send(&self, peer: usize, tag: u16, buf: &[u8]) {
        let handle = self.comm.isend(peer, tag, buf);
        self.state.lock().sends.push(handle);
    }

    fn post_recv(&self, peer: usize, tag: u16, len: usize) -> RequestId {
        let handle = self.comm.irecv(peer, tag, len);
        let mut state = self.state.lock();
        state.requests.push(Request::Pending { peer, handle });
        state.requests.len() - 1
    }

    fn recv(&self, peer: usize, tag: u16, len: usize) -> Result<Vec<u8>, MeshError> {
        Self::complete(peer, self.comm.irecv(peer, tag, len))
    }

    fn take_request(&self, id: RequestId) -> Result<Vec<u8>, MeshError> {
        let mut state = self.state.lock();
        let n = state.requests.len();
        let slot = state.requests.get_mut(id).ok_or(MeshError::IndexOutOfRange {
            entity: "request",
            index: id,
            size: n,
        })?;
        let taken = std::mem::replace(slot, Request::Ready { peer: 0, data: None });
        let result = match taken {
            Request::Pending { peer, handle } => Self::complete(peer, handle),
            Request::Ready { peer, data } => data.ok_or_else(|| MeshError::CommError {
                neighbor: peer,
                message: format!("request {id} already consumed"),
            }),
        };
        // Consumed requests at the tail are released so the count drops
        // back once an exchange has been completed.
        while matches!(state.requests.last(), Some(Request::Ready { data: None, .. })) {
            state.requests.pop();
        }
        result
    }

    fn n_requests(&self) -> usize {
        self.state.lock().requests.len()
    }

    fn wait_requests(&self, start: usize) -> Result<(), MeshError> {
        let mut state = self.state.lock();
        for handle in state.sends.drain(..) {
            handle.wait();
        }
        let Some(pending) = state.requests.get_mut(start..) else {
            return Ok(());
        };
        for slot in pending {
            if let Request::Pending { peer, .. } = *slot {
                let Request::Pending { handle, .. } =
                    std::mem::replace(slot, Request::Ready { peer, data: None })
                else {
                    continue;
                };
                *slot = Request::Ready {
                    peer,
                    data: Some(Self::complete(peer, handle)?),
                };
            }
        }
        Ok(())
    }
}

impl<C: Communicator> fmt::Debug for PatchExchange<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchExchange")
            .field("rank", &self.comm.rank())
            .field("size", &self.comm.size())
            .field("comms_type", &self.comms_type)
            .field("n_requests", &self.n_requests())
            .finish()
    }
}

//! Inputs and outputs of the receiver state machine.
//!
//! ```text
//! network / store / signer completions ──→ Event ──→ CatchainReceiver::handle ──→ Vec<Action>
//!                                                                                     │
//!            CatchainService executes each Action against the ports ←─────────────────┘
//! ```
//!
//! Every asynchronous operation the receiver starts is an [`Action`]; its
//! completion comes back as an [`Event`] on the same logical thread.

pub mod wire;

use std::time::Duration;

use shared_crypto::Ed25519Signature;

use crate::domain::{BlockHash, DeliveredBlock, KeyHash, PeerId, SourceId};

/// Host-assigned handle for an inbound query awaiting a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueryId(pub u64);

/// What an outbound query was for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryContext {
    GetDifference,
    GetBlock { hash: BlockHash },
}

/// Why a store write was issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WritePurpose {
    /// A validated block received from a peer.
    RemoteBlock,
    /// Own block bytes (`PersistingId`).
    LocalBlock,
    /// Root pointer moved to a new own block (`PersistingHeader`).
    LocalRootPointer,
    /// Root pointer rewritten during unsafe start-up reconciliation.
    ResyncRootPointer,
}

#[derive(Debug)]
pub enum Event {
    /// Load the DAG from the store and start the timers.
    Boot,
    /// Wake-up; due timers fire.
    Tick,
    /// Application request for a new own block.
    AddBlock {
        payload: Vec<u8>,
        deps: Vec<BlockHash>,
    },
    MessageReceived {
        from: PeerId,
        data: Vec<u8>,
    },
    BroadcastReceived {
        from: PeerId,
        data: Vec<u8>,
    },
    QueryReceived {
        from: PeerId,
        data: Vec<u8>,
        query_id: QueryId,
    },
    QueryCompleted {
        peer: PeerId,
        context: QueryContext,
        result: Result<Vec<u8>, String>,
    },
    SignatureReady {
        hash: BlockHash,
        result: Result<Ed25519Signature, String>,
    },
    StoreWritten {
        key: BlockHash,
        purpose: WritePurpose,
        result: Result<(), String>,
    },
    StoreLoaded {
        key: BlockHash,
        result: Result<Option<Vec<u8>>, String>,
    },
    /// The listener has seen the blame notification for `source`.
    BlameProcessed {
        source: SourceId,
    },
}

#[derive(Debug)]
pub enum Action {
    SendMessage {
        to: PeerId,
        data: Vec<u8>,
    },
    Multicast {
        to: Vec<PeerId>,
        data: Vec<u8>,
    },
    SendQuery {
        to: PeerId,
        name: &'static str,
        data: Vec<u8>,
        timeout: Duration,
        context: QueryContext,
    },
    Reply {
        query_id: QueryId,
        result: Result<Vec<u8>, String>,
    },
    Sign {
        identity: KeyHash,
        hash: BlockHash,
    },
    StoreWrite {
        key: BlockHash,
        value: Vec<u8>,
        purpose: WritePurpose,
    },
    StoreRead {
        key: BlockHash,
    },
    Deliver(DeliveredBlock),
    NotifyStarted,
    NotifyBlame {
        source: SourceId,
    },
    NotifyBroadcast {
        source: KeyHash,
        data: Vec<u8>,
    },
    CustomQuery {
        source: KeyHash,
        data: Vec<u8>,
        query_id: QueryId,
    },
}

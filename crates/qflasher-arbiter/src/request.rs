//! Requests carried from the gateway to the dispatcher

use std::sync::mpsc::{self, Receiver, SyncSender};

use qflasher_core::mode::OperationKind;

use crate::error::{ArbiterError, Result};
use crate::priority::Priority;

/// Message on the request queue
pub(crate) enum Request {
    /// Run one operation
    Op(OperationRequest),
    /// Release the transport and park
    LowLevelSetup,
    /// Release the transport and exit
    Terminate,
}

/// Data moving with an operation
pub(crate) enum Buffer {
    /// Erase has no data
    None,
    /// Write payload, copied at submission and freed by the dispatcher
    Owned(Vec<u8>),
    /// Read destination, handed back on completion
    Reply(ReadReply),
}

/// One unit of work for the dispatcher
pub(crate) struct OperationRequest {
    pub(crate) kind: OperationKind,
    pub(crate) address: u32,
    pub(crate) length: usize,
    pub(crate) buffer: Buffer,
    pub(crate) priority: Priority,
}

impl OperationRequest {
    /// A read of `len` bytes; the returned [`Completion`] yields the data
    pub(crate) fn read(
        kind: OperationKind,
        address: u32,
        len: usize,
        priority: Priority,
    ) -> (Self, Completion) {
        let (done, completion) = mpsc::sync_channel(1);
        let request = Self {
            kind,
            address,
            length: len,
            buffer: Buffer::Reply(ReadReply {
                buf: vec![0; len],
                done,
            }),
            priority,
        };
        (request, Completion { rx: completion })
    }

    pub(crate) fn write(address: u32, data: &[u8], priority: Priority) -> Self {
        Self {
            kind: OperationKind::Write,
            address,
            length: data.len(),
            buffer: Buffer::Owned(data.to_vec()),
            priority,
        }
    }

    pub(crate) fn erase(address: u32, len: usize, priority: Priority) -> Self {
        Self {
            kind: OperationKind::Erase,
            address,
            length: len,
            buffer: Buffer::None,
            priority,
        }
    }
}

/// Read buffer travelling to the dispatcher and back
pub(crate) struct ReadReply {
    buf: Vec<u8>,
    done: SyncSender<Vec<u8>>,
}

impl ReadReply {
    pub(crate) fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Hand the filled buffer back to the waiting reader
    pub(crate) fn complete(self) {
        if self.done.send(self.buf).is_err() {
            log::debug!("Reader went away before its read completed");
        }
    }
}

/// Completion signal for one read, owned by the submitting thread
pub(crate) struct Completion {
    rx: Receiver<Vec<u8>>,
}

impl Completion {
    /// Block until the dispatcher has filled the buffer
    pub(crate) fn wait(self) -> Result<Vec<u8>> {
        self.rx.recv().map_err(|_| ArbiterError::Disconnected)
    }
}

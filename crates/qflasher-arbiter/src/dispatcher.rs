//! The dispatcher thread
//!
//! Sole executor of queued operations. It owns the device mode, switches
//! the transport between the normal and fast-read configurations only when
//! the next operation needs the other one, and runs every operation at the
//! priority of the thread that submitted it.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use qflasher_core::mode::{self, DeviceMode, OperationKind};
use qflasher_core::ops;
use qflasher_core::transport::FlashTransport;

use crate::flash::Shared;
use crate::priority::Priority;
use crate::request::{Buffer, OperationRequest, Request};

pub(crate) struct Dispatcher<T> {
    shared: Arc<Shared<T>>,
    queue: Receiver<Request>,
    mode: DeviceMode,
    baseline: Priority,
}

impl<T: FlashTransport> Dispatcher<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>, queue: Receiver<Request>, baseline: Priority) -> Self {
        Self {
            shared,
            queue,
            mode: DeviceMode::None,
            baseline,
        }
    }

    pub(crate) fn run(mut self) {
        self.shared.scheduler.set_current_priority(self.baseline);
        log::debug!("Flash dispatcher started");

        while let Ok(request) = self.queue.recv() {
            match request {
                Request::Op(op) => self.execute(op),
                Request::LowLevelSetup => self.park(),
                Request::Terminate => break,
            }
        }

        self.release();
        log::debug!("Flash dispatcher stopped");
    }

    fn execute(&mut self, op: OperationRequest) {
        let kind = op.kind;
        self.shared.scheduler.set_current_priority(op.priority);

        {
            let mut transport = self.shared.transport();
            let steps = self.mode.transition_to(kind);
            if let Err(e) = mode::reconfigure(&mut *transport, steps, &self.shared.retry) {
                // Nothing can be served without a transport
                log::error!("Unable to reconnect to flash: {}", e);
                std::process::abort();
            }
            perform(&mut *transport, &self.shared, op);
        }

        self.mode = DeviceMode::from(kind);
        self.shared.scheduler.set_current_priority(self.baseline);
    }

    fn park(&mut self) {
        log::debug!("Dispatcher parking for low-level access");
        self.release();
        self.shared.park.park();
        log::debug!("Dispatcher resumed");
    }

    /// Tear down whatever the transport is configured for
    fn release(&mut self) {
        let steps = self.mode.release();
        let mut transport = self.shared.transport();
        if let Err(e) = mode::reconfigure(&mut *transport, steps, &self.shared.retry) {
            log::error!("Failed to release flash transport: {}", e);
        }
        self.mode = DeviceMode::None;
    }
}

fn perform<T: FlashTransport>(transport: &mut T, shared: &Shared<T>, op: OperationRequest) {
    let OperationRequest {
        kind,
        address,
        length,
        buffer,
        ..
    } = op;
    let geometry = &shared.geometry;
    let commands = &shared.commands;

    match (kind, buffer) {
        (OperationKind::Read, Buffer::Reply(mut reply)) => {
            ops::read(
                transport,
                geometry,
                commands,
                shared.read_chunk_size,
                address,
                reply.buf_mut(),
            );
            reply.complete();
        }
        (
            OperationKind::FastReadRaw | OperationKind::FastReadNibbleSwap,
            Buffer::Reply(mut reply),
        ) => {
            if let Some(mode) = kind.fast_read_mode() {
                transport.fast_read_set_mode(mode);
            }
            ops::fast_read(
                transport,
                geometry,
                shared.read_chunk_size,
                address,
                reply.buf_mut(),
                None,
            );
            reply.complete();
        }
        (OperationKind::Write, Buffer::Owned(data)) => {
            ops::write(transport, geometry, commands, address, &data);
        }
        (OperationKind::Erase, Buffer::None) => {
            ops::erase(transport, geometry, commands, address, length);
        }
        (kind, _) => {
            log::error!("Discarding {:?} request with mismatched buffer", kind);
        }
    }
}

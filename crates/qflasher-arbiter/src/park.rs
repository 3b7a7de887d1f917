//! Dispatcher park handshake
//!
//! The low-level path needs the dispatcher idle and off the transport. The
//! requester moves the state to `ParkRequested` and queues a sentinel; the
//! dispatcher reaches the sentinel, releases the transport, moves to
//! `Parked` and sleeps until the state returns to `Running`. Only the
//! thread that asked for the park may end it.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::error::{ArbiterError, Result};

/// Where the dispatcher is in the park handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParkState {
    /// Serving the queue
    #[default]
    Running,
    /// Asked to park, sentinel in flight
    ParkRequested,
    /// Idle and off the transport
    Parked,
}

#[derive(Debug, Default)]
struct Inner {
    state: ParkState,
    owner: Option<ThreadId>,
}

#[derive(Debug, Default)]
pub(crate) struct ParkHandshake {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl ParkHandshake {
    pub(crate) fn state(&self) -> ParkState {
        self.inner.lock().state
    }

    /// Whether the calling thread opened the current window
    pub(crate) fn is_owned_by_current_thread(&self) -> bool {
        self.inner.lock().owner == Some(thread::current().id())
    }

    /// `Running` to `ParkRequested`, owned by the calling thread
    pub(crate) fn request(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != ParkState::Running {
            return Err(ArbiterError::AlreadyParked);
        }
        inner.state = ParkState::ParkRequested;
        inner.owner = Some(thread::current().id());
        Ok(())
    }

    /// Undo a request whose sentinel never reached the queue
    pub(crate) fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ParkState::ParkRequested {
            inner.state = ParkState::Running;
            inner.owner = None;
        }
    }

    /// Block the requester until the dispatcher has parked
    pub(crate) fn wait_parked(&self) {
        let mut inner = self.inner.lock();
        while inner.state == ParkState::ParkRequested {
            self.changed.wait(&mut inner);
        }
    }

    /// Dispatcher side: announce the park and sleep until resumed
    pub(crate) fn park(&self) {
        let mut inner = self.inner.lock();
        inner.state = ParkState::Parked;
        self.changed.notify_all();
        while inner.state == ParkState::Parked {
            self.changed.wait(&mut inner);
        }
    }

    /// `Parked` to `Running`, waking the dispatcher
    pub(crate) fn resume(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != ParkState::Parked {
            return Err(ArbiterError::NotParked);
        }
        inner.state = ParkState::Running;
        inner.owner = None;
        self.changed.notify_all();
        Ok(())
    }
}

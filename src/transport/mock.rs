//! Scripted transport for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportFuture};

/// Observable state shared between a [`MockTransport`] and the test.
#[derive(Debug, Default)]
pub struct MockState {
    /// Results handed out by successive `connect` calls; empty means success.
    pub connect_results: VecDeque<bool>,
    /// Chunks handed out by successive `read_chunk` calls.
    pub chunks: VecDeque<Result<Bytes>>,
    /// Everything written, in order.
    pub written: Vec<Bytes>,
    pub connect_calls: u32,
    pub disconnect_calls: u32,
    pub reset_calls: u32,
    pub open: bool,
    /// Makes every `send` fail.
    pub fail_sends: bool,
}

/// Transport whose behaviour is driven by a shared [`MockState`].
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    resettable: bool,
    prefix_len: usize,
}

impl MockTransport {
    pub fn new() -> (Self, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let transport = Self {
            state: Arc::clone(&state),
            resettable: false,
            prefix_len: 0,
        };
        (transport, state)
    }

    pub fn resettable() -> (Self, Arc<Mutex<MockState>>) {
        let (mut transport, state) = Self::new();
        transport.resettable = true;
        (transport, state)
    }

    pub fn with_prefix_len(mut self, prefix_len: usize) -> Self {
        self.prefix_len = prefix_len;
        self
    }
}

impl MockState {
    pub fn push_chunk(&mut self, data: &'static [u8]) {
        self.chunks.push_back(Ok(Bytes::from_static(data)));
    }

    pub fn written_commands(&self) -> Vec<u8> {
        self.written.iter().map(|frame| frame[1]).collect()
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> TransportFuture<'_, ()> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut state = state.lock().unwrap();
            state.connect_calls += 1;
            if state.connect_results.pop_front().unwrap_or(true) {
                state.open = true;
                Ok(())
            } else {
                Err(Error::PortNotFound)
            }
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_, ()> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut state = state.lock().unwrap();
            state.disconnect_calls += 1;
            state.open = false;
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> TransportFuture<'_, ()> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut state = state.lock().unwrap();
            if !state.open {
                return Err(Error::NotConnected);
            }
            if state.fail_sends {
                state.open = false;
                return Err(Error::ConnectionClosed);
            }
            state.written.push(data);
            Ok(())
        })
    }

    fn read_chunk(&mut self, _timeout: Duration) -> TransportFuture<'_, Bytes> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut state = state.lock().unwrap();
            if !state.open {
                return Err(Error::NotConnected);
            }
            state.chunks.pop_front().unwrap_or_else(|| Ok(Bytes::new()))
        })
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn supports_hardware_reset(&self) -> bool {
        self.resettable
    }

    fn hardware_reset(&mut self) -> TransportFuture<'_, bool> {
        let state = Arc::clone(&self.state);
        let resettable = self.resettable;
        Box::pin(async move {
            if resettable {
                state.lock().unwrap().reset_calls += 1;
            }
            Ok(resettable)
        })
    }

    fn frame_prefix_len(&self) -> usize {
        self.prefix_len
    }
}

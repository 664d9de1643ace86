//! AF_UNIX sockets
//!
//! Local stream and datagram sockets. Names live in a flat registry
//! keyed by the bound path; a stream connect materializes a pair of
//! cross-linked ends, the server side landing in the listener's backlog.

use alloc::{
    collections::{BTreeMap, VecDeque},
    string::String,
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, Status};
use crate::sync::event::Event;
use crate::sync::wait;

/// One direction-agnostic end of a connected stream pair.
pub struct StreamEnd {
    peer: spin::RwLock<Weak<StreamEnd>>,
    rx: spin::Mutex<VecDeque<u8>>,
    pub rx_ready: Event,
    closed: AtomicBool,
    /// Path this end's side was bound to ("" for the connecting side).
    pub local_path: String,
}

impl StreamEnd {
    fn new(local_path: &str) -> Arc<StreamEnd> {
        Arc::new(StreamEnd {
            peer: spin::RwLock::new(Weak::new()),
            rx: spin::Mutex::new(VecDeque::new()),
            rx_ready: Event::notification(),
            closed: AtomicBool::new(false),
            local_path: String::from(local_path),
        })
    }

    pub fn peer_path(&self) -> Option<String> {
        self.peer.read().upgrade().map(|p| p.local_path.clone())
    }

    pub fn send(&self, data: &[u8]) -> Result<usize> {
        let peer = self.peer.read().upgrade().ok_or(Status::NotConnected)?;
        if peer.closed.load(Ordering::Acquire) {
            return Err(Status::ConnectionReset);
        }
        peer.rx.lock().extend(data.iter().copied());
        peer.rx_ready.set();
        Ok(data.len())
    }

    pub fn recv(&self, buf: &mut [u8], nonblock: bool) -> Result<usize> {
        loop {
            {
                let mut rx = self.rx.lock();
                if !rx.is_empty() {
                    let n = buf.len().min(rx.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = rx.pop_front().unwrap_or(0);
                    }
                    if rx.is_empty() {
                        self.rx_ready.clear();
                    }
                    return Ok(n);
                }
            }
            if self.peer.read().upgrade().is_none() || self.closed.load(Ordering::Acquire) {
                return Ok(0); // EOF
            }
            if nonblock {
                return Err(Status::WouldBlock);
            }
            wait::wait_on(self.rx_ready.header())?;
        }
    }

    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(peer) = self.peer.read().upgrade() {
            peer.rx_ready.set();
        }
        self.rx_ready.set();
    }
}

/// Cross-link a fresh pair of stream ends.
pub fn stream_pair(a_path: &str, b_path: &str) -> (Arc<StreamEnd>, Arc<StreamEnd>) {
    let a = StreamEnd::new(a_path);
    let b = StreamEnd::new(b_path);
    *a.peer.write() = Arc::downgrade(&b);
    *b.peer.write() = Arc::downgrade(&a);
    (a, b)
}

pub struct Listener {
    pub path: String,
    backlog: spin::Mutex<VecDeque<Arc<StreamEnd>>>,
    pub pending_ready: Event,
}

pub struct DgramSocket {
    pub path: spin::RwLock<Option<String>>,
    queue: spin::Mutex<VecDeque<(Vec<u8>, Option<String>)>>,
    pub data_ready: Event,
    pub peer: spin::RwLock<Option<String>>,
}

impl DgramSocket {
    pub fn new() -> Arc<DgramSocket> {
        Arc::new(DgramSocket {
            path: spin::RwLock::new(None),
            queue: spin::Mutex::new(VecDeque::new()),
            data_ready: Event::notification(),
            peer: spin::RwLock::new(None),
        })
    }

    pub fn recv_from(&self, buf: &mut [u8], nonblock: bool) -> Result<(usize, Option<String>)> {
        loop {
            {
                let mut queue = self.queue.lock();
                if let Some((data, from)) = queue.pop_front() {
                    if queue.is_empty() {
                        self.data_ready.clear();
                    }
                    let n = buf.len().min(data.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    return Ok((n, from));
                }
            }
            if nonblock {
                return Err(Status::WouldBlock);
            }
            wait::wait_on(self.data_ready.header())?;
        }
    }
}

enum Named {
    Listener(Arc<Listener>),
    Dgram(Arc<DgramSocket>),
}

lazy_static::lazy_static! {
    static ref REGISTRY: spin::Mutex<BTreeMap<String, Named>> = spin::Mutex::new(BTreeMap::new());
}

pub fn bind_listener(path: &str) -> Result<Arc<Listener>> {
    let mut registry = REGISTRY.lock();
    if registry.contains_key(path) {
        return Err(Status::AddressInUse);
    }
    let listener = Arc::new(Listener {
        path: String::from(path),
        backlog: spin::Mutex::new(VecDeque::new()),
        pending_ready: Event::notification(),
    });
    registry.insert(String::from(path), Named::Listener(listener.clone()));
    Ok(listener)
}

pub fn bind_dgram(path: &str, sock: &Arc<DgramSocket>) -> Result<()> {
    let mut registry = REGISTRY.lock();
    if registry.contains_key(path) {
        return Err(Status::AddressInUse);
    }
    *sock.path.write() = Some(String::from(path));
    registry.insert(String::from(path), Named::Dgram(sock.clone()));
    Ok(())
}

pub fn unbind(path: &str) {
    REGISTRY.lock().remove(path);
}

/// Connect a stream socket to a listening path; returns the client end.
pub fn connect_stream(path: &str) -> Result<Arc<StreamEnd>> {
    let listener = {
        let registry = REGISTRY.lock();
        match registry.get(path) {
            Some(Named::Listener(l)) => l.clone(),
            _ => return Err(Status::ConnectionRefused),
        }
    };
    let (client, server) = stream_pair("", path);
    listener.backlog.lock().push_back(server);
    listener.pending_ready.set();
    Ok(client)
}

pub fn accept(listener: &Arc<Listener>, nonblock: bool) -> Result<Arc<StreamEnd>> {
    loop {
        {
            let mut backlog = listener.backlog.lock();
            if let Some(end) = backlog.pop_front() {
                if backlog.is_empty() {
                    listener.pending_ready.clear();
                }
                return Ok(end);
            }
        }
        if nonblock {
            return Err(Status::WouldBlock);
        }
        wait::wait_on(listener.pending_ready.header())?;
    }
}

/// Datagram send to a bound path.
pub fn send_dgram(from: Option<&str>, to: &str, data: &[u8]) -> Result<usize> {
    let target = {
        let registry = REGISTRY.lock();
        match registry.get(to) {
            Some(Named::Dgram(d)) => d.clone(),
            _ => return Err(Status::NotFound),
        }
    };
    target
        .queue
        .lock()
        .push_back((data.to_vec(), from.map(String::from)));
    target.data_ready.set();
    Ok(data.len())
}

//! Tracked descriptors and their listeners.
//!
//! A stream descriptor (socket, pipe) has one listening port. A listening
//! socket may be shared by several ports; incoming-connection events go to
//! one of them at a time, round-robin over the ports that asked for
//! reads and still hold tokens.
//!
//! Every in/out notification costs the receiving port a token. A listener
//! with no tokens left contributes no interest, so the poller stops
//! reporting the descriptor until the port returns tokens.

use std::collections::VecDeque;
use std::os::fd::RawFd;

use smallvec::SmallVec;
use vesper_core::{SimpleHashMap, hash_word};

use crate::message::{EVENT_MASK, IN_EVENT, OUT_EVENT};
use crate::port::Port;

const CONSUMES_TOKEN: u32 = (1 << IN_EVENT) | (1 << OUT_EVENT);

/// What kind of file a descriptor is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Stream,
    Pipe,
    ListeningSocket,
}

// =============================================================================
// Listeners
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct SingleListener {
    port: Port,
    mask: u32,
    tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PortEntry {
    port: Port,
    is_reading: bool,
    tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MultipleListeners {
    entries: Vec<PortEntry>,
    /// Reading ports with tokens, in notification order.
    active: VecDeque<Port>,
}

impl MultipleListeners {
    fn entry_mut(&mut self, port: Port) -> Option<&mut PortEntry> {
        self.entries.iter_mut().find(|e| e.port == port)
    }

    fn deactivate(&mut self, port: Port) {
        self.active.retain(|&p| p != port);
    }

    fn activate(&mut self, port: Port) {
        if !self.active.contains(&port) {
            self.active.push_back(port);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Listeners {
    Single(SingleListener),
    Multiple(MultipleListeners),
}

// =============================================================================
// DescriptorInfo
// =============================================================================

/// Everything the handler knows about one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorInfo {
    fd: RawFd,
    kind: DescriptorKind,
    /// Whether the descriptor is currently registered with the poller.
    tracked: bool,
    token_count: u32,
    listeners: Listeners,
}

impl DescriptorInfo {
    pub fn new(fd: RawFd, kind: DescriptorKind, token_count: u32) -> Self {
        let listeners = match kind {
            DescriptorKind::ListeningSocket => Listeners::Multiple(MultipleListeners {
                entries: Vec::new(),
                active: VecDeque::new(),
            }),
            DescriptorKind::Stream | DescriptorKind::Pipe => Listeners::Single(SingleListener {
                port: Port::ILLEGAL,
                mask: 0,
                tokens: token_count,
            }),
        };
        DescriptorInfo {
            fd,
            kind,
            tracked: false,
            token_count,
            listeners,
        }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    #[inline]
    pub fn is_listening_socket(&self) -> bool {
        self.kind == DescriptorKind::ListeningSocket
    }

    #[inline]
    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    pub fn set_tracked(&mut self, tracked: bool) {
        self.tracked = tracked;
    }

    /// Interest bits the poller should watch right now.
    pub fn mask(&self) -> u32 {
        match &self.listeners {
            Listeners::Single(l) if l.tokens > 0 => l.mask,
            Listeners::Single(_) => 0,
            Listeners::Multiple(m) if m.active.is_empty() => 0,
            Listeners::Multiple(_) => 1 << IN_EVENT,
        }
    }

    /// Route the events in `mask` for this descriptor to `port`.
    pub fn set_port_and_mask(&mut self, port: Port, mask: u32) {
        let mask = mask & EVENT_MASK;
        let token_count = self.token_count;
        match &mut self.listeners {
            Listeners::Single(l) => {
                l.port = port;
                l.mask = mask;
            }
            Listeners::Multiple(m) => {
                let is_reading = mask & (1 << IN_EVENT) != 0;
                let index = match m.entries.iter().position(|e| e.port == port) {
                    Some(index) => index,
                    None => {
                        m.entries.push(PortEntry {
                            port,
                            is_reading: false,
                            tokens: token_count,
                        });
                        m.entries.len() - 1
                    }
                };
                let entry = &mut m.entries[index];
                entry.is_reading = is_reading;
                let active = is_reading && entry.tokens > 0;
                if active {
                    m.activate(port);
                } else {
                    m.deactivate(port);
                }
            }
        }
    }

    /// The port that receives `events`, charging it a token when the events
    /// include data readiness. `None` when no port wants them.
    pub fn next_notify_port(&mut self, events: u32) -> Option<Port> {
        let consumes = events & CONSUMES_TOKEN != 0;
        match &mut self.listeners {
            Listeners::Single(l) => {
                if l.port.is_illegal() {
                    return None;
                }
                if consumes {
                    l.tokens = l.tokens.saturating_sub(1);
                }
                Some(l.port)
            }
            Listeners::Multiple(m) => {
                let port = *m.active.front()?;
                let mut exhausted = false;
                if consumes {
                    if let Some(entry) = m.entry_mut(port) {
                        entry.tokens = entry.tokens.saturating_sub(1);
                        exhausted = entry.tokens == 0;
                    }
                }
                if exhausted {
                    m.active.pop_front();
                } else {
                    m.active.rotate_left(1);
                }
                Some(port)
            }
        }
    }

    /// Every port that should hear about `events`, charging each one a
    /// token when the events include data readiness.
    pub fn notify_all_ports(&mut self, events: u32) -> SmallVec<[Port; 4]> {
        let consumes = events & CONSUMES_TOKEN != 0;
        match &mut self.listeners {
            Listeners::Single(l) => {
                if l.port.is_illegal() {
                    return SmallVec::new();
                }
                if consumes {
                    l.tokens = l.tokens.saturating_sub(1);
                }
                SmallVec::from_elem(l.port, 1)
            }
            Listeners::Multiple(m) => {
                let ports: SmallVec<[Port; 4]> = m.entries.iter().map(|e| e.port).collect();
                if consumes {
                    for entry in &mut m.entries {
                        entry.tokens = entry.tokens.saturating_sub(1);
                    }
                    let empty: SmallVec<[Port; 4]> =
                        m.entries.iter().filter(|e| e.tokens == 0).map(|e| e.port).collect();
                    for port in empty {
                        m.deactivate(port);
                    }
                }
                ports
            }
        }
    }

    /// Give `count` tokens back to `port`.
    pub fn return_tokens(&mut self, port: Port, count: u32) {
        match &mut self.listeners {
            Listeners::Single(l) => {
                debug_assert!(l.port == port || l.port.is_illegal());
                l.tokens = l.tokens.saturating_add(count);
            }
            Listeners::Multiple(m) => {
                let Some(entry) = m.entry_mut(port) else {
                    return;
                };
                entry.tokens = entry.tokens.saturating_add(count);
                let reactivate = entry.is_reading && entry.tokens > 0;
                if reactivate {
                    m.activate(port);
                }
            }
        }
    }

    /// Stop notifying `port`.
    pub fn remove_port(&mut self, port: Port) {
        match &mut self.listeners {
            Listeners::Single(l) => {
                if l.port == port {
                    l.port = Port::ILLEGAL;
                    l.mask = 0;
                }
            }
            Listeners::Multiple(m) => {
                m.entries.retain(|e| e.port != port);
                m.deactivate(port);
            }
        }
    }

    /// Whether any port still listens.
    pub fn has_listeners(&self) -> bool {
        match &self.listeners {
            Listeners::Single(l) => !l.port.is_illegal(),
            Listeners::Multiple(m) => !m.entries.is_empty(),
        }
    }

    /// Tokens `port` currently holds.
    pub fn tokens(&self, port: Port) -> Option<u32> {
        match &self.listeners {
            Listeners::Single(l) if l.port == port => Some(l.tokens),
            Listeners::Single(_) => None,
            Listeners::Multiple(m) => m.entries.iter().find(|e| e.port == port).map(|e| e.tokens),
        }
    }
}

// =============================================================================
// DescriptorTable
// =============================================================================

/// Descriptors keyed by `fd + 1`; key zero is the table's empty marker.
#[derive(Debug, Default)]
pub struct DescriptorTable {
    map: SimpleHashMap<usize, DescriptorInfo>,
}

#[inline]
fn key(fd: RawFd) -> (usize, u32) {
    debug_assert!(fd >= 0, "negative descriptor {fd}");
    let key = fd as usize + 1;
    (key, hash_word(key as u64))
}

impl DescriptorTable {
    pub fn new() -> Self {
        DescriptorTable::default()
    }

    pub fn get(&self, fd: RawFd) -> Option<&DescriptorInfo> {
        let (key, hash) = key(fd);
        self.map.lookup(key, hash).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut DescriptorInfo> {
        let (key, hash) = key(fd);
        self.map.lookup_mut(key, hash).map(|e| &mut e.value)
    }

    /// The descriptor for `fd`, created with `kind` on first use.
    pub fn get_or_insert(
        &mut self,
        fd: RawFd,
        kind: DescriptorKind,
        token_count: u32,
    ) -> &mut DescriptorInfo {
        let (key, hash) = key(fd);
        &mut self
            .map
            .lookup_or_insert(key, hash, || DescriptorInfo::new(fd, kind, token_count))
            .value
    }

    pub fn remove(&mut self, fd: RawFd) -> Option<DescriptorInfo> {
        let (key, hash) = key(fd);
        self.map.remove(key, hash)
    }

    pub fn len(&self) -> usize {
        self.map.occupancy()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop every descriptor, handing each to `f`.
    pub fn clear_with<F: FnMut(DescriptorInfo)>(&mut self, f: F) {
        self.map.clear_with(f);
    }
}

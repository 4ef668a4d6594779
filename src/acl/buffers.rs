//! Shared ACL frame queues and the outbound credit scheduler
//!
//! [`AclBuffers`] is the only ACL state touched outside the host runner. Applications
//! enqueue outbound frames and dequeue inbound frames through an [`AclQueueEnd`];
//! the runner fragments outbound frames against the controller's buffer credits and
//! pushes reassembled inbound frames.

use core::cell::RefCell;

use embassy_sync::{
    blocking_mutex::{Mutex, raw::RawMutex},
    signal::Signal,
};
use heapless::{Deque, Vec};

use crate::{
    Error,
    acl::{LinkId, assembler::Frame, packet::PacketBoundary},
    constants::{FRAME_QUEUE_DEPTH, MAX_ACL_PACKET_SIZE, MAX_CONNECTIONS},
    hci::ConnectionHandle,
};

/// One outbound ACL fragment ready to be framed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Link the fragment belongs to
    pub handle: ConnectionHandle,
    /// Whether it starts or continues a PDU
    pub packet_boundary: PacketBoundary,
    /// Payload bytes
    pub data: Vec<u8, MAX_ACL_PACKET_SIZE>,
}

struct LinkQueues {
    link: LinkId,
    outbound: Deque<Frame, FRAME_QUEUE_DEPTH>,
    inbound: Deque<Frame, FRAME_QUEUE_DEPTH>,
    unacked: u16,
}

struct InFlight {
    handle: ConnectionHandle,
    frame: Frame,
    offset: usize,
}

struct BufferState {
    links: Vec<LinkQueues, MAX_CONNECTIONS>,
    credits: u16,
    packet_size: usize,
    cursor: usize,
    in_flight: Option<InFlight>,
}

impl BufferState {
    fn link(&mut self, link: LinkId) -> Result<&mut LinkQueues, Error> {
        self.links
            .iter_mut()
            .find(|queues| queues.link == link)
            .ok_or(Error::DeviceNotConnected)
    }

    fn link_by_handle(&mut self, handle: ConnectionHandle) -> Option<&mut LinkQueues> {
        self.links
            .iter_mut()
            .find(|queues| queues.link.handle == handle)
    }

    /// Pick the next frame to send, rotating over links
    fn start_next_frame(&mut self) -> Option<InFlight> {
        let count = self.links.len();
        for step in 0..count {
            let index = (self.cursor + step) % count;
            let queues = &mut self.links[index];
            if let Some(frame) = queues.outbound.pop_front() {
                let handle = queues.link.handle;
                self.cursor = (index + 1) % count;
                return Some(InFlight {
                    handle,
                    frame,
                    offset: 0,
                });
            }
        }
        None
    }
}

/// Per-connection frame queues plus the shared controller credit pool
pub struct AclBuffers<M: RawMutex> {
    state: Mutex<M, RefCell<BufferState>>,
    outbound_ready: Signal<M, ()>,
}

impl<M: RawMutex> AclBuffers<M> {
    /// Create an empty pool with no controller credits
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(BufferState {
                links: Vec::new(),
                credits: 0,
                packet_size: MAX_ACL_PACKET_SIZE,
                cursor: 0,
                in_flight: None,
            })),
            outbound_ready: Signal::new(),
        }
    }

    /// Set the controller buffer geometry (`HCI_Read_Buffer_Size`)
    pub fn configure(&self, total_packets: u16, packet_size: u16) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            state.credits = total_packets;
            state.packet_size = usize::from(packet_size).clamp(1, MAX_ACL_PACKET_SIZE);
        });
    }

    /// Credits currently available
    #[must_use]
    pub fn credits(&self) -> u16 {
        self.state.lock(|state| state.borrow().credits)
    }

    /// Packets sent on `handle` and not yet acknowledged
    #[must_use]
    pub fn unacked(&self, handle: ConnectionHandle) -> u16 {
        self.state.lock(|state| {
            state
                .borrow_mut()
                .link_by_handle(handle)
                .map_or(0, |queues| queues.unacked)
        })
    }

    /// Get the application end of a link's queues
    #[must_use]
    pub fn queue_end(&self, link: LinkId) -> AclQueueEnd<'_, M> {
        AclQueueEnd {
            buffers: self,
            link,
        }
    }

    /// Wait until an application enqueues outbound data
    pub async fn wait_outbound(&self) {
        self.outbound_ready.wait().await;
    }

    pub(crate) fn open(&self, link: LinkId) -> Result<(), Error> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if state.link_by_handle(link.handle).is_some() {
                return Err(Error::InvalidState);
            }
            state
                .links
                .push(LinkQueues {
                    link,
                    outbound: Deque::new(),
                    inbound: Deque::new(),
                    unacked: 0,
                })
                .map_err(|_| Error::BufferFull)
        })
    }

    /// Drop a link's queues, returning its unacknowledged credits to the pool
    pub(crate) fn close(&self, handle: ConnectionHandle) -> u16 {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let Some(index) = state
                .links
                .iter()
                .position(|queues| queues.link.handle == handle)
            else {
                return 0;
            };
            let queues = state.links.swap_remove(index);
            state.credits = state.credits.saturating_add(queues.unacked);
            if state.cursor >= state.links.len() {
                state.cursor = 0;
            }
            if state
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.handle == handle)
            {
                state.in_flight = None;
            }
            queues.unacked
        })
    }

    /// Return credits reported by Number Of Completed Packets
    pub(crate) fn complete_packets(&self, handle: ConnectionHandle, count: u16) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let Some(queues) = state.link_by_handle(handle) else {
                debug!("[ACL] Completed packets for closed {:?}", handle);
                return;
            };
            let returned = count.min(queues.unacked);
            queues.unacked -= returned;
            state.credits = state.credits.saturating_add(returned);
        });
    }

    /// Push a reassembled frame to a link's inbound queue
    pub(crate) fn deliver_inbound(&self, handle: ConnectionHandle, frame: Frame) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let Some(queues) = state.link_by_handle(handle) else {
                return;
            };
            if queues.inbound.push_back(frame).is_err() {
                warn!("[ACL] Inbound queue full on {:?}, dropping frame", handle);
            }
        });
    }

    /// Next fragment to send, if a credit is available
    ///
    /// Nothing is consumed: the fragment stays at the head of the schedule until
    /// [`Self::commit_fragment`] records it as handed to the controller.
    pub(crate) fn peek_fragment(&self) -> Option<Fragment> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if state.credits == 0 {
                return None;
            }
            if state.in_flight.is_none() {
                state.in_flight = Some(state.start_next_frame()?);
            }
            let packet_size = state.packet_size;
            let in_flight = state.in_flight.as_ref()?;

            let packet_boundary = if in_flight.offset == 0 {
                PacketBoundary::FirstNonFlushable
            } else {
                PacketBoundary::ContinuingFragment
            };
            let end = (in_flight.offset + packet_size).min(in_flight.frame.len());
            let data = Vec::from_slice(&in_flight.frame[in_flight.offset..end]).ok()?;
            Some(Fragment {
                handle: in_flight.handle,
                packet_boundary,
                data,
            })
        })
    }

    /// Record a fragment from [`Self::peek_fragment`] as sent, consuming one credit
    pub(crate) fn commit_fragment(&self, fragment: &Fragment) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let Some(in_flight) = state.in_flight.as_mut() else {
                return;
            };
            if in_flight.handle != fragment.handle {
                return;
            }
            in_flight.offset += fragment.data.len();
            if in_flight.offset >= in_flight.frame.len() {
                state.in_flight = None;
            }
            state.credits = state.credits.saturating_sub(1);
            if let Some(queues) = state.link_by_handle(fragment.handle) {
                queues.unacked += 1;
            }
        });
    }
}

impl<M: RawMutex> Default for AclBuffers<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Application end of one connection's frame queues
pub struct AclQueueEnd<'a, M: RawMutex> {
    buffers: &'a AclBuffers<M>,
    link: LinkId,
}

impl<M: RawMutex> AclQueueEnd<'_, M> {
    /// Link this end belongs to
    #[must_use]
    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Queue an L2CAP frame (basic header included) for transmission
    ///
    /// # Errors
    /// * [`Error::DeviceNotConnected`] once the link is gone
    /// * [`Error::BufferFull`] when the frame is too large or the queue is full
    pub fn enqueue(&self, frame: &[u8]) -> Result<(), Error> {
        let frame = Frame::from_slice(frame).map_err(|()| Error::BufferFull)?;
        self.buffers.state.lock(|state| {
            let mut state = state.borrow_mut();
            let queues = state.link(self.link)?;
            queues
                .outbound
                .push_back(frame)
                .map_err(|_| Error::BufferFull)
        })?;
        self.buffers.outbound_ready.signal(());
        Ok(())
    }

    /// Take the oldest received frame, if any
    pub fn try_dequeue(&self) -> Option<Frame> {
        self.buffers.state.lock(|state| {
            state
                .borrow_mut()
                .link(self.link)
                .ok()
                .and_then(|queues| queues.inbound.pop_front())
        })
    }
}

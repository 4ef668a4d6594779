//! Transport seam between the managers and the controller
//!
//! The managers never talk to a byte stream. They hand typed commands and encoded ACL
//! packets to an [`HciTransport`]. Inside the host runner that transport is a
//! [`CommandQueue`], which holds commands back until the controller grants a command
//! credit and lets the runner drain them in order.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{Mutex, raw::RawMutex};
use heapless::{Deque, Vec};

use crate::{
    Error,
    constants::{ACL_PACKET_BUFFER_SIZE, ACL_PACKET_QUEUE_DEPTH, COMMAND_QUEUE_DEPTH},
    hci::Command,
};

/// Outbound half of the HCI transport
///
/// Methods take `&self`; implementors use interior mutability so several components
/// can share one transport. A refused item was not queued and stays owned by the
/// caller.
pub trait HciTransport {
    /// Queue a command for the controller
    ///
    /// # Errors
    /// [`Error::BufferFull`] when the command could not be queued
    fn send_command(&self, command: &Command) -> Result<(), Error>;

    /// Queue an encoded ACL data packet (header included) for the controller
    ///
    /// # Errors
    /// [`Error::BufferFull`] when the packet could not be queued
    fn send_acl(&self, packet: &[u8]) -> Result<(), Error>;
}

/// An encoded ACL packet waiting for the controller
pub type AclPacketBuffer = Vec<u8, ACL_PACKET_BUFFER_SIZE>;

struct QueueState {
    credits: u8,
    commands: Deque<Command, COMMAND_QUEUE_DEPTH>,
    acl: Deque<AclPacketBuffer, ACL_PACKET_QUEUE_DEPTH>,
}

/// Credit-gated command queue plus ACL packet FIFO
///
/// Starts with one command credit. Every Command Complete or Command Status event
/// replaces the credit count with the controller's `Num_HCI_Command_Packets`.
pub struct CommandQueue<M: RawMutex> {
    state: Mutex<M, RefCell<QueueState>>,
}

impl<M: RawMutex> CommandQueue<M> {
    /// Create an empty queue holding one command credit
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(QueueState {
                credits: 1,
                commands: Deque::new(),
                acl: Deque::new(),
            })),
        }
    }

    /// Record the command credit reported by the controller
    pub fn set_credits(&self, num_hci_command_packets: u8) {
        self.state.lock(|state| {
            state.borrow_mut().credits = num_hci_command_packets;
        });
    }

    /// Current command credit
    #[must_use]
    pub fn credits(&self) -> u8 {
        self.state.lock(|state| state.borrow().credits)
    }

    /// Number of commands waiting for a credit
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.state.lock(|state| state.borrow().commands.len())
    }

    /// Take the next command if the controller can accept one, consuming a credit
    pub fn pop_command(&self) -> Option<Command> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if state.credits == 0 {
                return None;
            }
            let command = state.commands.pop_front()?;
            state.credits -= 1;
            Some(command)
        })
    }

    /// Take the next ACL packet
    pub fn pop_acl(&self) -> Option<AclPacketBuffer> {
        self.state.lock(|state| state.borrow_mut().acl.pop_front())
    }
}

impl<M: RawMutex> Default for CommandQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> HciTransport for CommandQueue<M> {
    fn send_command(&self, command: &Command) -> Result<(), Error> {
        self.state
            .lock(|state| state.borrow_mut().commands.push_back(command.clone()))
            .map_err(|_| {
                warn!("[HOST] Command queue full, refusing {:?}", command.opcode());
                Error::BufferFull
            })
    }

    fn send_acl(&self, packet: &[u8]) -> Result<(), Error> {
        let Ok(buffer) = AclPacketBuffer::from_slice(packet) else {
            error!("[HOST] ACL packet of {} bytes exceeds buffer", packet.len());
            return Err(Error::InvalidParameter);
        };
        self.state
            .lock(|state| state.borrow_mut().acl.push_back(buffer))
            .map_err(|_| {
                trace!("[HOST] ACL packet queue full");
                Error::BufferFull
            })
    }
}

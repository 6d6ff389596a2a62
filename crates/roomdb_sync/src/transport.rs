//! Room transport abstraction and the in-memory authority.

use crate::error::{SyncError, SyncResult};
use roomdb_protocol::{Envelope, InputFrame};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// An event delivered by a room connection.
///
/// Events are drained by polling; the sync core runs single-threaded
/// cooperative, so the transport never calls back into it.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// This client was the first to open the room.
    RoomCreated,
    /// Join completed: the room snapshot (opaque, may be absent) and the
    /// historical inputs.
    Joined {
        /// Opaque room snapshot.
        snapshot: Option<Vec<u8>>,
        /// Historical inputs, not necessarily sorted.
        inputs: Vec<InputFrame>,
    },
    /// A sequenced input rebroadcast by the authority.
    Input(InputFrame),
    /// The link to the authority was lost.
    Disconnected,
    /// The link to the authority came back.
    Reconnected,
}

/// A live connection to a room.
pub trait RoomConnection {
    /// Sends an envelope to the authority for sequencing.
    fn send(&mut self, envelope: &Envelope) -> SyncResult<()>;

    /// Takes the next queued event, if any.
    fn poll(&mut self) -> Option<TransportEvent>;

    /// Closes the connection.
    fn close(&mut self);
}

/// A factory for room connections.
///
/// Implementations own all networking; the sync core requires only that
/// inputs arrive with strictly increasing `seq` per room and that `send`
/// leads to a rebroadcast `Input` to every member, the sender included.
pub trait RoomTransport {
    /// Connects to a room, creating it on first join.
    fn connect(&self, url: &str, room_id: &str) -> SyncResult<Box<dyn RoomConnection>>;
}

#[derive(Default)]
struct Member {
    queue: VecDeque<TransportEvent>,
    online: bool,
    open: bool,
}

#[derive(Default)]
struct Room {
    next_seq: u64,
    history: Vec<InputFrame>,
    members: Vec<Member>,
}

impl Room {
    fn broadcast(&mut self, frame: InputFrame) {
        self.history.push(frame.clone());
        for member in &mut self.members {
            if member.open && member.online {
                member.queue.push_back(TransportEvent::Input(frame.clone()));
            }
        }
    }
}

/// An in-memory authority: sequencer, history, and broadcast in one.
///
/// Each room totally orders the envelopes sent to it, starting at
/// `seq = 1`, and rebroadcasts every input to all online members
/// including the sender. Joining a room delivers its full history.
/// Clones share the same rooms.
///
/// Members that are offline miss rebroadcasts entirely (the v1 protocol
/// has no catch-up), which makes this authority a convenient harness for
/// sequence-gap behavior as well as the happy path.
#[derive(Clone, Default)]
pub struct MemoryAuthority {
    rooms: Rc<RefCell<HashMap<String, Rc<RefCell<Room>>>>>,
}

impl MemoryAuthority {
    /// Creates an authority with no rooms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sequenced inputs in a room's history.
    pub fn history_len(&self, room_id: &str) -> usize {
        self.rooms
            .borrow()
            .get(room_id)
            .map(|room| room.borrow().history.len())
            .unwrap_or(0)
    }

    /// The sequenced history of a room, in `seq` order.
    pub fn history(&self, room_id: &str) -> Vec<InputFrame> {
        self.rooms
            .borrow()
            .get(room_id)
            .map(|room| room.borrow().history.clone())
            .unwrap_or_default()
    }

    /// Severs one member's link (members are indexed in join order).
    ///
    /// The member receives a `Disconnected` event and misses all
    /// rebroadcasts until restored.
    pub fn drop_member(&self, room_id: &str, member: usize) {
        self.with_member(room_id, member, |m| {
            m.online = false;
            m.queue.push_back(TransportEvent::Disconnected);
        });
    }

    /// Restores one member's link, delivering a `Reconnected` event.
    pub fn restore_member(&self, room_id: &str, member: usize) {
        self.with_member(room_id, member, |m| {
            m.online = true;
            m.queue.push_back(TransportEvent::Reconnected);
        });
    }

    fn with_member(&self, room_id: &str, member: usize, f: impl FnOnce(&mut Member)) {
        if let Some(room) = self.rooms.borrow().get(room_id) {
            if let Some(m) = room.borrow_mut().members.get_mut(member) {
                f(m);
            }
        }
    }
}

impl RoomTransport for MemoryAuthority {
    fn connect(&self, _url: &str, room_id: &str) -> SyncResult<Box<dyn RoomConnection>> {
        let mut rooms = self.rooms.borrow_mut();
        let (room, created) = match rooms.get(room_id) {
            Some(room) => (Rc::clone(room), false),
            None => {
                let room = Rc::new(RefCell::new(Room::default()));
                rooms.insert(room_id.to_string(), Rc::clone(&room));
                (room, true)
            }
        };

        let member = {
            let mut state = room.borrow_mut();
            let index = state.members.len();
            let mut queue = VecDeque::new();
            if created {
                queue.push_back(TransportEvent::RoomCreated);
            }
            queue.push_back(TransportEvent::Joined {
                snapshot: None,
                inputs: state.history.clone(),
            });
            state.members.push(Member {
                queue,
                online: true,
                open: true,
            });
            index
        };

        Ok(Box::new(MemoryConnection { room, member }))
    }
}

/// One member's connection to a [`MemoryAuthority`] room.
pub struct MemoryConnection {
    room: Rc<RefCell<Room>>,
    member: usize,
}

impl RoomConnection for MemoryConnection {
    fn send(&mut self, envelope: &Envelope) -> SyncResult<()> {
        let mut room = self.room.borrow_mut();
        let member = &room.members[self.member];
        if !member.open || !member.online {
            return Err(SyncError::NotConnected);
        }

        room.next_seq += 1;
        let frame = InputFrame::new(room.next_seq, envelope)?;
        room.broadcast(frame);
        Ok(())
    }

    fn poll(&mut self) -> Option<TransportEvent> {
        self.room.borrow_mut().members[self.member].queue.pop_front()
    }

    fn close(&mut self) {
        let mut room = self.room.borrow_mut();
        let member = &mut room.members[self.member];
        member.open = false;
        member.queue.clear();
    }
}

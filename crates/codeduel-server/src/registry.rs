use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use codeduel_core::events::ServerEvent;
use codeduel_core::room::{Participant, ParticipantId, Room, RoomPhase};

use crate::error::RoomError;

/// Transport-session identifier, assigned by the host when a client
/// connects. Used only for targeted disconnect detection; never persisted.
pub type SessionId = Uuid;

/// Per-session sender for outbound events. Bounded so a slow client drops
/// events instead of backing up the engine.
pub type SessionSender = mpsc::Sender<ServerEvent>;

/// One connected client as the engine sees it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub tx: SessionSender,
}

impl SessionHandle {
    pub fn new(tx: SessionSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }
}

/// Send an event to one session. Best-effort: a full or closed channel is
/// logged and skipped.
pub fn send_to(session: &SessionHandle, event: &ServerEvent) {
    if let Err(e) = session.tx.try_send(event.clone()) {
        tracing::debug!(session = %session.id, error = %e, "Dropping event for slow session");
    }
}

pub type SharedRegistry = Arc<RwLock<RoomRegistry>>;

struct MemberSession {
    session_id: SessionId,
    sender: SessionSender,
}

struct RoomEntry {
    room: Room,
    sessions: HashMap<ParticipantId, MemberSession>,
    last_activity: Instant,
}

/// Outcome of a completion attempt. A room that already left `in_progress`
/// drops the completion with no effect (at-most-once winner guarantee).
#[derive(Debug)]
pub enum Completion {
    Finalized(Room),
    Stale,
    NotFound,
}

/// Outcome of an abandonment attempt. Terminal phases are never
/// overwritten; repeating the call is a no-op.
#[derive(Debug)]
pub enum Abandonment {
    Abandoned(Room),
    AlreadyFinal,
    NotFound,
}

/// In-memory source of truth for live rooms: who is in each match and what
/// phase it is in. All mutation goes through methods that enforce the
/// phase transition rules; callers serialize through the surrounding
/// `RwLock` so exactly one of two racing transitions wins.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, RoomEntry>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, room_code: &str) -> bool {
        self.rooms.contains_key(room_code)
    }

    pub fn snapshot(&self, room_code: &str) -> Option<Room> {
        self.rooms.get(room_code).map(|e| e.room.clone())
    }

    /// Register a freshly created room with the creator's session attached.
    pub fn insert(&mut self, room: Room, creator_session: &SessionHandle) {
        let creator_id = room.creator.id;
        let mut sessions = HashMap::new();
        sessions.insert(
            creator_id,
            MemberSession {
                session_id: creator_session.id,
                sender: creator_session.tx.clone(),
            },
        );
        self.rooms.insert(
            room.code.clone(),
            RoomEntry {
                room,
                sessions,
                last_activity: Instant::now(),
            },
        );
    }

    /// The waiting -> in_progress transition: attaches the opponent fields
    /// together, exactly once. Preconditions re-checked here so a request
    /// that raced another join (or an abandonment) loses cleanly.
    pub fn begin_match(
        &mut self,
        room_code: &str,
        opponent: Participant,
        session: &SessionHandle,
        started_at: u64,
    ) -> Result<Room, RoomError> {
        let entry = self.rooms.get_mut(room_code).ok_or(RoomError::RoomNotFound)?;
        if !entry.room.phase.can_transition(RoomPhase::InProgress) {
            return Err(RoomError::RoomNotJoinable);
        }
        if entry.room.creator.id == opponent.id {
            return Err(RoomError::SelfJoin);
        }

        entry.sessions.insert(
            opponent.id,
            MemberSession {
                session_id: session.id,
                sender: session.tx.clone(),
            },
        );
        entry.room.opponent = Some(opponent);
        entry.room.phase = RoomPhase::InProgress;
        entry.room.started_at = Some(started_at);
        entry.last_activity = Instant::now();
        Ok(entry.room.clone())
    }

    /// The in_progress -> completed transition. Idempotent: invoked only by
    /// the scheduler on a verdict hit, and dropped without effect if the
    /// room already left `in_progress`.
    pub fn complete_match(
        &mut self,
        room_code: &str,
        winner: ParticipantId,
        ended_at: u64,
    ) -> Completion {
        let Some(entry) = self.rooms.get_mut(room_code) else {
            return Completion::NotFound;
        };
        if !entry.room.phase.can_transition(RoomPhase::Completed) {
            return Completion::Stale;
        }
        entry.room.phase = RoomPhase::Completed;
        entry.room.winner = Some(winner);
        entry.room.ended_at = Some(ended_at);
        entry.last_activity = Instant::now();
        Completion::Finalized(entry.room.clone())
    }

    /// Any non-terminal -> abandoned transition. Terminal phases are never
    /// overwritten.
    pub fn abandon(&mut self, room_code: &str, ended_at: u64) -> Abandonment {
        let Some(entry) = self.rooms.get_mut(room_code) else {
            return Abandonment::NotFound;
        };
        if !entry.room.phase.can_transition(RoomPhase::Abandoned) {
            return Abandonment::AlreadyFinal;
        }
        entry.room.phase = RoomPhase::Abandoned;
        entry.room.ended_at = Some(ended_at);
        entry.last_activity = Instant::now();
        Abandonment::Abandoned(entry.room.clone())
    }

    /// Drop a room from the live map. Its persistent record survives.
    pub fn remove(&mut self, room_code: &str) {
        self.rooms.remove(room_code);
    }

    /// Rooms a transport session is attached to (for disconnect handling).
    pub fn rooms_with_session(&self, session_id: SessionId) -> Vec<String> {
        self.rooms
            .iter()
            .filter(|(_, e)| e.sessions.values().any(|s| s.session_id == session_id))
            .map(|(code, _)| code.clone())
            .collect()
    }

    pub fn is_member(&self, room_code: &str, participant_id: ParticipantId) -> bool {
        self.rooms.get(room_code).is_some_and(|e| {
            e.room.creator.id == participant_id
                || e.room.opponent.as_ref().is_some_and(|o| o.id == participant_id)
        })
    }

    /// Deliver an event to every session attached to a room.
    pub fn broadcast_to_room(&self, room_code: &str, event: &ServerEvent) {
        if let Some(entry) = self.rooms.get(room_code) {
            for (&pid, member) in &entry.sessions {
                if let Err(e) = member.sender.try_send(event.clone()) {
                    tracing::debug!(
                        participant_id = pid, room = room_code, error = %e,
                        "Skipping broadcast to slow session"
                    );
                }
            }
        }
    }

    /// Deliver an event to every session in a room except one participant's.
    pub fn broadcast_to_room_except(
        &self,
        room_code: &str,
        exclude: ParticipantId,
        event: &ServerEvent,
    ) {
        if let Some(entry) = self.rooms.get(room_code) {
            for (&pid, member) in &entry.sessions {
                if pid != exclude
                    && let Err(e) = member.sender.try_send(event.clone())
                {
                    tracing::debug!(
                        participant_id = pid, room = room_code, error = %e,
                        "Skipping broadcast to slow session"
                    );
                }
            }
        }
    }

    /// Waiting rooms idle for longer than `max_idle`, for the lobby reaper.
    pub fn stale_waiting_rooms(&self, max_idle: Duration) -> Vec<String> {
        let now = Instant::now();
        self.rooms
            .iter()
            .filter(|(_, e)| {
                e.room.phase == RoomPhase::Waiting
                    && now.duration_since(e.last_activity) >= max_idle
            })
            .map(|(code, _)| code.clone())
            .collect()
    }

    /// (live rooms, attached sessions) for status logging.
    pub fn stats(&self) -> (usize, usize) {
        let sessions = self.rooms.values().map(|e| e.sessions.len()).sum();
        (self.rooms.len(), sessions)
    }
}

//! Wire types for the real-time channel.
//!
//! The engine does not own the transport; it consumes inbound
//! [`ClientRequest`] values already decoded by the host and emits
//! [`ServerEvent`] values through per-session channels. Both sides
//! serialize as JSON frames tagged by `action`/`event`.
//!
//! Delivery is best-effort and unordered-safe: clients must tolerate a
//! `polling_update` arriving after `match_ended` under reordering, and
//! must treat `match_ended`/`opponent_left` as authoritative terminal
//! signals for the room.

use serde::{Deserialize, Serialize};

use crate::problem::ProblemDescriptor;
use crate::room::{Difficulty, ParticipantId};

/// Inbound requests from a participant's client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum ClientRequest {
    CreateRoom(CreateRoomMsg),
    JoinRoom(JoinRoomMsg),
    LeaveRoom(LeaveRoomMsg),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomMsg {
    pub participant_id: ParticipantId,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomMsg {
    pub participant_id: ParticipantId,
    pub room_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomMsg {
    pub participant_id: ParticipantId,
    pub room_code: String,
}

/// Outbound room-scoped events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent to the creator only.
    RoomCreated(RoomCreatedMsg),
    /// Sent to both members when the opponent joins.
    MatchStarted(MatchStartedMsg),
    /// Progress heartbeat while the scheduler watches for verdicts.
    PollingUpdate(PollingUpdateMsg),
    /// Final result; at most one per room.
    MatchEnded(MatchEndedMsg),
    /// A member left or disconnected; the room is abandoned.
    OpponentLeft(OpponentLeftMsg),
    /// Targeted to the originating session only, never broadcast.
    Error(ErrorMsg),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreatedMsg {
    pub room_code: String,
    pub problem: ProblemDescriptor,
}

/// Identity as shown to room members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub username: String,
    pub handle: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStartedMsg {
    pub room_code: String,
    pub problem: ProblemDescriptor,
    pub creator: ParticipantInfo,
    pub opponent: ParticipantInfo,
    /// Epoch milliseconds.
    pub started_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingUpdateMsg {
    pub message: String,
    pub timestamp: u64,
}

/// Stats of the winning submission, shown in the final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionStatsMsg {
    pub id: u64,
    pub time_ms: u64,
    pub memory_bytes: u64,
    pub language: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEndedMsg {
    pub room_code: String,
    pub winner_id: ParticipantId,
    pub winner_username: String,
    pub submission: SubmissionStatsMsg,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpponentLeftMsg {
    pub room_code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMsg {
    pub message: String,
}

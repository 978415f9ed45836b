/// Failures surfaced to the requesting participant. Each maps to a
/// distinct user-facing message; upstream-service flakiness never appears
/// here (the scheduler swallows it per tick and retries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    RoomNotFound,
    /// The room exists but is not in the phase the request needs.
    RoomNotJoinable,
    SelfJoin,
    HandleVerificationFailed(String),
    UnknownParticipant,
    NotARoomMember,
    Storage(String),
}

impl std::fmt::Display for RoomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoomNotFound => write!(f, "Room not found"),
            Self::RoomNotJoinable => write!(f, "Room has already started or ended"),
            Self::SelfJoin => write!(f, "You cannot join your own room"),
            Self::HandleVerificationFailed(handle) => {
                write!(f, "Codeforces handle '{handle}' could not be verified")
            },
            Self::UnknownParticipant => write!(f, "User not found"),
            Self::NotARoomMember => write!(f, "You are not a member of this room"),
            Self::Storage(_) => write!(f, "Failed to save match state"),
        }
    }
}

impl std::error::Error for RoomError {}

impl From<sqlx::Error> for RoomError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

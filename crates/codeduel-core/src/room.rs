use serde::{Deserialize, Serialize};

use crate::problem::ProblemDescriptor;

/// Identity reference into the account store.
pub type ParticipantId = i64;

/// Length of a shareable room code.
pub const ROOM_CODE_LEN: usize = 6;

const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Lifecycle phase of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    Waiting,
    InProgress,
    Completed,
    Abandoned,
}

impl RoomPhase {
    /// Completed and abandoned rooms never change phase again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    /// Whether `self -> to` is a legal phase transition. Every registry
    /// mutation goes through this check.
    pub fn can_transition(self, to: RoomPhase) -> bool {
        matches!(
            (self, to),
            (Self::Waiting, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::Waiting, Self::Abandoned)
                | (Self::InProgress, Self::Abandoned)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

impl std::fmt::Display for RoomPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested match difficulty, mapped to a Codeforces rating window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Rating window as a half-open range `[min, max)`.
    pub fn rating_bounds(self) -> (u32, u32) {
        match self {
            Self::Easy => (800, 1200),
            Self::Medium => (1200, 1600),
            Self::Hard => (1600, 2000),
        }
    }
}

/// One side of a room: an account identity plus its Codeforces handle.
/// The handle must have passed verification before being attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub handle: String,
}

/// A two-party match instance.
///
/// Invariants maintained by the registry: the opponent fields are set
/// together exactly once on the waiting -> in_progress transition, and
/// `ended_at` is set iff the phase is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub code: String,
    pub creator: Participant,
    pub opponent: Option<Participant>,
    pub problem: ProblemDescriptor,
    pub phase: RoomPhase,
    /// Epoch milliseconds; set when the match starts.
    pub started_at: Option<u64>,
    /// Epoch milliseconds; set when the room reaches a terminal phase.
    pub ended_at: Option<u64>,
    pub winner: Option<ParticipantId>,
}

impl Room {
    pub fn new(code: String, creator: Participant, problem: ProblemDescriptor) -> Self {
        Self {
            code,
            creator,
            opponent: None,
            problem,
            phase: RoomPhase::Waiting,
            started_at: None,
            ended_at: None,
            winner: None,
        }
    }
}

/// Generate a random room code (uppercase alphanumeric).
pub fn generate_room_code() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// Uppercase a user-supplied room code. Codes are case-insensitive on input.
pub fn normalize_room_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN && code.bytes().all(|b| CODE_CHARS.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases() {
        assert!(!RoomPhase::Waiting.is_terminal());
        assert!(!RoomPhase::InProgress.is_terminal());
        assert!(RoomPhase::Completed.is_terminal());
        assert!(RoomPhase::Abandoned.is_terminal());
    }

    #[test]
    fn legal_transitions() {
        assert!(RoomPhase::Waiting.can_transition(RoomPhase::InProgress));
        assert!(RoomPhase::Waiting.can_transition(RoomPhase::Abandoned));
        assert!(RoomPhase::InProgress.can_transition(RoomPhase::Completed));
        assert!(RoomPhase::InProgress.can_transition(RoomPhase::Abandoned));
    }

    #[test]
    fn illegal_transitions() {
        // Terminal phases are final
        assert!(!RoomPhase::Completed.can_transition(RoomPhase::Abandoned));
        assert!(!RoomPhase::Abandoned.can_transition(RoomPhase::Completed));
        assert!(!RoomPhase::Completed.can_transition(RoomPhase::InProgress));
        // No skipping waiting -> completed
        assert!(!RoomPhase::Waiting.can_transition(RoomPhase::Completed));
        // No re-entry
        assert!(!RoomPhase::InProgress.can_transition(RoomPhase::InProgress));
        assert!(!RoomPhase::InProgress.can_transition(RoomPhase::Waiting));
    }

    #[test]
    fn phase_string_roundtrip() {
        for phase in [
            RoomPhase::Waiting,
            RoomPhase::InProgress,
            RoomPhase::Completed,
            RoomPhase::Abandoned,
        ] {
            assert_eq!(RoomPhase::from_str_opt(phase.as_str()), Some(phase));
        }
        assert_eq!(RoomPhase::from_str_opt("paused"), None);
    }

    #[test]
    fn difficulty_windows_are_400_points() {
        assert_eq!(Difficulty::Easy.rating_bounds(), (800, 1200));
        assert_eq!(Difficulty::Medium.rating_bounds(), (1200, 1600));
        assert_eq!(Difficulty::Hard.rating_bounds(), (1600, 2000));
    }

    #[test]
    fn room_code_format() {
        for _ in 0..100 {
            let code = generate_room_code();
            assert!(is_valid_room_code(&code), "Invalid room code: {code}");
        }
    }

    #[test]
    fn room_code_normalization() {
        assert_eq!(normalize_room_code(" ab12cd "), "AB12CD");
        assert!(is_valid_room_code(&normalize_room_code("ab12cd")));
        assert!(!is_valid_room_code("ab12cd")); // lowercase rejected raw
        assert!(!is_valid_room_code("AB12C")); // too short
        assert!(!is_valid_room_code("AB12CD7X")); // too long
    }

    #[test]
    fn new_room_starts_waiting() {
        let room = Room::new(
            "AB12CD".into(),
            Participant {
                id: 1,
                handle: "tourist".into(),
            },
            crate::problem::ProblemDescriptor::fallback(),
        );
        assert_eq!(room.phase, RoomPhase::Waiting);
        assert!(room.opponent.is_none());
        assert!(room.started_at.is_none());
        assert!(room.ended_at.is_none());
        assert!(room.winner.is_none());
    }
}

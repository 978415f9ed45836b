use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};

use codeduel_core::events::{
    ClientRequest, CreateRoomMsg, ErrorMsg, JoinRoomMsg, LeaveRoomMsg, MatchStartedMsg,
    OpponentLeftMsg, ParticipantInfo, RoomCreatedMsg, ServerEvent,
};
use codeduel_core::judge::JudgeClient;
use codeduel_core::room::{Participant, ParticipantId, Room, RoomPhase, generate_room_code, normalize_room_code};
use codeduel_core::time::now_millis;

use crate::config::ServerConfig;
use crate::error::RoomError;
use crate::registry::{
    Abandonment, RoomRegistry, SessionHandle, SessionId, SharedRegistry, send_to,
};
use crate::scheduler::{PollContext, PollScheduler};
use crate::store::MatchStore;

/// Engine status snapshot for logging and health reporting.
#[derive(Debug, Clone, Copy)]
pub struct EngineStatus {
    pub live_rooms: usize,
    pub sessions: usize,
    /// Poll tasks currently contending for the shared API gate.
    pub active_polls: usize,
}

/// The match orchestration engine.
///
/// Owns the room registry, the poll scheduler, and the persistent mirror;
/// consumes the judge through the `JudgeClient` seam. The transport host
/// opens sessions with [`open_session`], feeds decoded requests through
/// [`dispatch`], and reports closed connections via
/// [`session_disconnected`].
///
/// [`open_session`]: MatchEngine::open_session
/// [`dispatch`]: MatchEngine::dispatch
/// [`session_disconnected`]: MatchEngine::session_disconnected
pub struct MatchEngine<J: JudgeClient> {
    rooms: SharedRegistry,
    store: MatchStore,
    judge: Arc<J>,
    scheduler: Arc<PollScheduler>,
    config: Arc<ServerConfig>,
}

impl<J: JudgeClient> Clone for MatchEngine<J> {
    fn clone(&self) -> Self {
        Self {
            rooms: Arc::clone(&self.rooms),
            store: self.store.clone(),
            judge: Arc::clone(&self.judge),
            scheduler: Arc::clone(&self.scheduler),
            config: Arc::clone(&self.config),
        }
    }
}

impl<J: JudgeClient> MatchEngine<J> {
    pub fn new(config: ServerConfig, store: MatchStore, judge: J) -> Self {
        let interval = Duration::from_millis(config.polling.interval_ms);
        Self {
            rooms: Arc::new(RwLock::new(RoomRegistry::new())),
            store,
            judge: Arc::new(judge),
            scheduler: Arc::new(PollScheduler::new(interval)),
            config: Arc::new(config),
        }
    }

    /// Allocate a session handle and its event receiver for a newly
    /// connected client.
    pub fn open_session(&self) -> (SessionHandle, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(self.config.limits.session_event_buffer);
        (SessionHandle::new(tx), rx)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &MatchStore {
        &self.store
    }

    pub fn judge(&self) -> &J {
        &self.judge
    }

    pub fn rooms(&self) -> &SharedRegistry {
        &self.rooms
    }

    pub async fn status(&self) -> EngineStatus {
        let (live_rooms, sessions) = {
            let rooms = self.rooms.read().await;
            rooms.stats()
        };
        EngineStatus {
            live_rooms,
            sessions,
            active_polls: self.scheduler.active_count(),
        }
    }

    /// Route one decoded request. Failures are reported as a targeted
    /// `error` event to the originating session, never broadcast.
    pub async fn dispatch(&self, session: &SessionHandle, request: ClientRequest) {
        let result = match request {
            ClientRequest::CreateRoom(msg) => self.create_room(session, msg).await,
            ClientRequest::JoinRoom(msg) => self.join_room(session, msg).await,
            ClientRequest::LeaveRoom(msg) => self.leave_room(msg).await,
        };
        if let Err(e) = result {
            tracing::warn!(session = %session.id, error = %e, "Request failed");
            send_to(
                session,
                &ServerEvent::Error(ErrorMsg {
                    message: e.to_string(),
                }),
            );
        }
    }

    /// Allocate a room: pick a problem for the requested difficulty,
    /// persist the record, register the room as `waiting`, and confirm to
    /// the creator.
    async fn create_room(
        &self,
        session: &SessionHandle,
        msg: CreateRoomMsg,
    ) -> Result<(), RoomError> {
        let identity = self
            .store
            .fetch_identity(msg.participant_id)
            .await?
            .ok_or(RoomError::UnknownParticipant)?;

        let (min_rating, max_rating) = msg.difficulty.rating_bounds();
        let selection = self.judge.lookup_problem(min_rating, max_rating).await;
        if selection.is_fallback() {
            tracing::warn!(
                participant_id = msg.participant_id,
                "Issuing fallback problem (degraded mode)"
            );
        }
        let problem = selection.into_descriptor();

        let code = {
            let rooms = self.rooms.read().await;
            loop {
                let candidate = generate_room_code();
                if !rooms.contains(&candidate) {
                    break candidate;
                }
            }
        };

        let room = Room::new(
            code.clone(),
            Participant {
                id: msg.participant_id,
                handle: identity.handle,
            },
            problem,
        );
        // A room that cannot be recorded is not created at all
        self.store.insert_room(&room).await?;

        let event = ServerEvent::RoomCreated(RoomCreatedMsg {
            room_code: code.clone(),
            problem: room.problem.clone(),
        });
        {
            let mut rooms = self.rooms.write().await;
            rooms.insert(room, session);
        }
        send_to(session, &event);
        tracing::info!(room = %code, participant_id = msg.participant_id, "Room created");
        Ok(())
    }

    /// The waiting -> in_progress transition: validate, verify the
    /// joiner's handle upstream, commit the transition, then broadcast
    /// `match_started` and start the poll task.
    async fn join_room(&self, session: &SessionHandle, msg: JoinRoomMsg) -> Result<(), RoomError> {
        let code = normalize_room_code(&msg.room_code);

        // Fast validation pass before any upstream calls
        {
            let rooms = self.rooms.read().await;
            let room = rooms.snapshot(&code).ok_or(RoomError::RoomNotFound)?;
            if room.phase != RoomPhase::Waiting {
                return Err(RoomError::RoomNotJoinable);
            }
            if room.creator.id == msg.participant_id {
                return Err(RoomError::SelfJoin);
            }
        }

        let identity = self
            .store
            .fetch_identity(msg.participant_id)
            .await?
            .ok_or(RoomError::UnknownParticipant)?;
        if !self.judge.verify_handle(&identity.handle).await {
            return Err(RoomError::HandleVerificationFailed(identity.handle));
        }

        let started_at = now_millis();
        // Preconditions re-checked under the write lock; a request that
        // raced another join or an abandonment loses here.
        let room = {
            let mut rooms = self.rooms.write().await;
            rooms.begin_match(
                &code,
                Participant {
                    id: msg.participant_id,
                    handle: identity.handle.clone(),
                },
                session,
                started_at,
            )?
        };

        // Lazy mirror: the in-memory transition already won
        if let Err(e) = self
            .store
            .mark_started(&code, msg.participant_id, &identity.handle, started_at)
            .await
        {
            tracing::error!(room = %code, error = %e, "Failed to mirror match start");
        }

        let creator = self.participant_info(&room.creator).await;
        let opponent = ParticipantInfo {
            id: msg.participant_id,
            username: identity.username,
            handle: identity.handle,
        };
        let event = ServerEvent::MatchStarted(MatchStartedMsg {
            room_code: code.clone(),
            problem: room.problem.clone(),
            creator,
            opponent,
            started_at,
        });
        {
            let rooms = self.rooms.read().await;
            rooms.broadcast_to_room(&code, &event);
        }

        self.scheduler.start(code.clone(), self.poll_context());
        tracing::info!(room = %code, participant_id = msg.participant_id, "Match started");
        Ok(())
    }

    /// Explicit leave by a verified room member. Forces abandonment.
    async fn leave_room(&self, msg: LeaveRoomMsg) -> Result<(), RoomError> {
        let code = normalize_room_code(&msg.room_code);
        {
            let rooms = self.rooms.read().await;
            if !rooms.contains(&code) {
                return Err(RoomError::RoomNotFound);
            }
            if !rooms.is_member(&code, msg.participant_id) {
                return Err(RoomError::NotARoomMember);
            }
        }
        self.abandon_room(&code, "Opponent left the match", Some(msg.participant_id))
            .await;
        Ok(())
    }

    /// Transport disconnect: abandon every room the session was part of.
    /// Terminal rooms are unaffected (they already left the registry).
    pub async fn session_disconnected(&self, session_id: SessionId) {
        let codes = {
            let rooms = self.rooms.read().await;
            rooms.rooms_with_session(session_id)
        };
        for code in codes {
            tracing::info!(room = %code, session = %session_id, "Session disconnected");
            self.abandon_room(&code, "Opponent disconnected", None).await;
        }
    }

    /// Abandon any waiting rooms idle past the configured timeout.
    /// Returns how many were reaped.
    pub async fn reap_stale_lobbies(&self) -> usize {
        let max_idle = Duration::from_secs(self.config.rooms.idle_timeout_secs);
        let stale = {
            let rooms = self.rooms.read().await;
            rooms.stale_waiting_rooms(max_idle)
        };
        let count = stale.len();
        for code in stale {
            tracing::info!(room = %code, "Reaping idle waiting room");
            self.abandon_room(&code, "Room expired", None).await;
        }
        count
    }

    /// Force a room into `abandoned`: stop its poll task, mirror the
    /// record, notify remaining members, and drop it from the live map.
    /// Idempotent; terminal phases are never overwritten.
    async fn abandon_room(&self, code: &str, notice: &str, leaver: Option<ParticipantId>) {
        let ended_at = now_millis();
        let outcome = {
            let mut rooms = self.rooms.write().await;
            rooms.abandon(code, ended_at)
        };
        match outcome {
            Abandonment::Abandoned(_) => {},
            Abandonment::AlreadyFinal | Abandonment::NotFound => return,
        }

        self.scheduler.stop(code);

        if let Err(e) = self.store.mark_abandoned(code, ended_at).await {
            tracing::error!(room = %code, error = %e, "Failed to mirror abandonment");
        }

        let event = ServerEvent::OpponentLeft(OpponentLeftMsg {
            room_code: code.to_string(),
            message: notice.to_string(),
        });
        {
            let rooms = self.rooms.read().await;
            match leaver {
                Some(participant_id) => {
                    rooms.broadcast_to_room_except(code, participant_id, &event);
                },
                None => rooms.broadcast_to_room(code, &event),
            }
        }
        {
            let mut rooms = self.rooms.write().await;
            rooms.remove(code);
        }
        tracing::info!(room = %code, "Room abandoned");
    }

    async fn participant_info(&self, participant: &Participant) -> ParticipantInfo {
        let username = match self.store.fetch_identity(participant.id).await {
            Ok(Some(identity)) => identity.username,
            Ok(None) => participant.handle.clone(),
            Err(e) => {
                tracing::error!(participant_id = participant.id, error = %e, "Identity lookup failed");
                participant.handle.clone()
            },
        };
        ParticipantInfo {
            id: participant.id,
            username,
            handle: participant.handle.clone(),
        }
    }

    fn poll_context(&self) -> PollContext<J> {
        PollContext {
            rooms: Arc::clone(&self.rooms),
            store: self.store.clone(),
            judge: Arc::clone(&self.judge),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeduel_core::problem::ProblemDescriptor;
    use codeduel_core::room::Difficulty;
    use codeduel_core::stub_judge::StubJudge;

    struct TestBed {
        engine: MatchEngine<StubJudge>,
        alice: ParticipantId,
        bob: ParticipantId,
    }

    async fn test_bed(judge: StubJudge) -> TestBed {
        let store = MatchStore::in_memory().await.unwrap();
        let alice = store.insert_account("alice", "alice_cf").await.unwrap();
        let bob = store.insert_account("bob", "bob_cf").await.unwrap();
        let config = ServerConfig {
            polling: crate::config::PollingConfig { interval_ms: 20 },
            ..ServerConfig::default()
        };
        TestBed {
            engine: MatchEngine::new(config, store, judge),
            alice,
            bob,
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Create a room as alice and return its code.
    async fn create_room(
        bed: &TestBed,
        session: &SessionHandle,
        rx: &mut mpsc::Receiver<ServerEvent>,
    ) -> String {
        bed.engine
            .dispatch(
                session,
                ClientRequest::CreateRoom(CreateRoomMsg {
                    participant_id: bed.alice,
                    difficulty: Difficulty::Medium,
                }),
            )
            .await;
        match recv(rx).await {
            ServerEvent::RoomCreated(msg) => msg.room_code,
            other => panic!("Expected RoomCreated, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_room_confirms_to_creator() {
        let problem = ProblemDescriptor::new(1500, "B", "Phoenix and Gold", 1400, vec![]);
        let bed = test_bed(StubJudge::new().with_problem(problem)).await;
        let (session, mut rx) = bed.engine.open_session();

        bed.engine
            .dispatch(
                &session,
                ClientRequest::CreateRoom(CreateRoomMsg {
                    participant_id: bed.alice,
                    difficulty: Difficulty::Medium,
                }),
            )
            .await;

        let ServerEvent::RoomCreated(msg) = recv(&mut rx).await else {
            panic!("Expected RoomCreated");
        };
        assert!(codeduel_core::room::is_valid_room_code(&msg.room_code));
        let (min, max) = Difficulty::Medium.rating_bounds();
        assert!(msg.problem.rating >= min && msg.problem.rating < max);

        // Registry holds the waiting room, store mirrors it
        let room = bed
            .engine
            .rooms()
            .read()
            .await
            .snapshot(&msg.room_code)
            .unwrap();
        assert_eq!(room.phase, RoomPhase::Waiting);
        let row = bed
            .engine
            .store()
            .room_row(&msg.room_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "waiting");
        // No poll task until the match starts
        assert_eq!(bed.engine.scheduler().active_count(), 0);
    }

    #[tokio::test]
    async fn create_room_for_unknown_participant_fails() {
        let bed = test_bed(StubJudge::new()).await;
        let (session, mut rx) = bed.engine.open_session();

        bed.engine
            .dispatch(
                &session,
                ClientRequest::CreateRoom(CreateRoomMsg {
                    participant_id: 9999,
                    difficulty: Difficulty::Easy,
                }),
            )
            .await;

        let ServerEvent::Error(err) = recv(&mut rx).await else {
            panic!("Expected Error");
        };
        assert_eq!(err.message, "User not found");
    }

    #[tokio::test]
    async fn join_starts_match_and_poll_task() {
        let bed = test_bed(StubJudge::new()).await;
        let (creator, mut creator_rx) = bed.engine.open_session();
        let (joiner, mut joiner_rx) = bed.engine.open_session();
        let code = create_room(&bed, &creator, &mut creator_rx).await;

        // Case-insensitive code input
        bed.engine
            .dispatch(
                &joiner,
                ClientRequest::JoinRoom(JoinRoomMsg {
                    participant_id: bed.bob,
                    room_code: code.to_ascii_lowercase(),
                }),
            )
            .await;

        let ServerEvent::MatchStarted(started) = recv(&mut joiner_rx).await else {
            panic!("Expected MatchStarted");
        };
        assert_eq!(started.room_code, code);
        assert_eq!(started.creator.id, bed.alice);
        assert_eq!(started.creator.username, "alice");
        assert_eq!(started.opponent.id, bed.bob);
        assert_eq!(started.opponent.handle, "bob_cf");

        // Creator got the same broadcast
        let ServerEvent::MatchStarted(_) = recv(&mut creator_rx).await else {
            panic!("Expected MatchStarted for creator");
        };

        let room = bed.engine.rooms().read().await.snapshot(&code).unwrap();
        assert_eq!(room.phase, RoomPhase::InProgress);
        assert!(bed.engine.scheduler().is_running(&code));

        let row = bed.engine.store().room_row(&code).await.unwrap().unwrap();
        assert_eq!(row.status, "in_progress");
        assert_eq!(row.opponent_id, Some(bed.bob));
    }

    #[tokio::test]
    async fn self_join_is_rejected() {
        let bed = test_bed(StubJudge::new()).await;
        let (creator, mut creator_rx) = bed.engine.open_session();
        let code = create_room(&bed, &creator, &mut creator_rx).await;

        bed.engine
            .dispatch(
                &creator,
                ClientRequest::JoinRoom(JoinRoomMsg {
                    participant_id: bed.alice,
                    room_code: code.clone(),
                }),
            )
            .await;

        let ServerEvent::Error(err) = recv(&mut creator_rx).await else {
            panic!("Expected Error");
        };
        assert_eq!(err.message, "You cannot join your own room");
        let room = bed.engine.rooms().read().await.snapshot(&code).unwrap();
        assert_eq!(room.phase, RoomPhase::Waiting);
    }

    #[tokio::test]
    async fn join_unknown_room_is_rejected() {
        let bed = test_bed(StubJudge::new()).await;
        let (joiner, mut rx) = bed.engine.open_session();

        bed.engine
            .dispatch(
                &joiner,
                ClientRequest::JoinRoom(JoinRoomMsg {
                    participant_id: bed.bob,
                    room_code: "ZZ99ZZ".into(),
                }),
            )
            .await;

        let ServerEvent::Error(err) = recv(&mut rx).await else {
            panic!("Expected Error");
        };
        assert_eq!(err.message, "Room not found");
    }

    #[tokio::test]
    async fn join_started_room_is_rejected() {
        let bed = test_bed(StubJudge::new()).await;
        let store = bed.engine.store().clone();
        let carol = store.insert_account("carol", "carol_cf").await.unwrap();

        let (creator, mut creator_rx) = bed.engine.open_session();
        let (joiner, mut joiner_rx) = bed.engine.open_session();
        let (late, mut late_rx) = bed.engine.open_session();
        let code = create_room(&bed, &creator, &mut creator_rx).await;

        bed.engine
            .dispatch(
                &joiner,
                ClientRequest::JoinRoom(JoinRoomMsg {
                    participant_id: bed.bob,
                    room_code: code.clone(),
                }),
            )
            .await;
        let ServerEvent::MatchStarted(_) = recv(&mut joiner_rx).await else {
            panic!("Expected MatchStarted");
        };

        bed.engine
            .dispatch(
                &late,
                ClientRequest::JoinRoom(JoinRoomMsg {
                    participant_id: carol,
                    room_code: code.clone(),
                }),
            )
            .await;
        let ServerEvent::Error(err) = recv(&mut late_rx).await else {
            panic!("Expected Error");
        };
        assert_eq!(err.message, "Room has already started or ended");
    }

    #[tokio::test]
    async fn unverified_handle_cannot_join() {
        let bed = test_bed(StubJudge::new().reject_handle("bob_cf")).await;
        let (creator, mut creator_rx) = bed.engine.open_session();
        let (joiner, mut joiner_rx) = bed.engine.open_session();
        let code = create_room(&bed, &creator, &mut creator_rx).await;

        bed.engine
            .dispatch(
                &joiner,
                ClientRequest::JoinRoom(JoinRoomMsg {
                    participant_id: bed.bob,
                    room_code: code.clone(),
                }),
            )
            .await;

        let ServerEvent::Error(err) = recv(&mut joiner_rx).await else {
            panic!("Expected Error");
        };
        assert!(err.message.contains("could not be verified"));
        let room = bed.engine.rooms().read().await.snapshot(&code).unwrap();
        assert_eq!(room.phase, RoomPhase::Waiting);
        assert!(!bed.engine.scheduler().is_running(&code));
    }

    #[tokio::test]
    async fn leave_notifies_remaining_member_and_abandons() {
        let bed = test_bed(StubJudge::new()).await;
        let (creator, mut creator_rx) = bed.engine.open_session();
        let (joiner, mut joiner_rx) = bed.engine.open_session();
        let code = create_room(&bed, &creator, &mut creator_rx).await;

        bed.engine
            .dispatch(
                &joiner,
                ClientRequest::JoinRoom(JoinRoomMsg {
                    participant_id: bed.bob,
                    room_code: code.clone(),
                }),
            )
            .await;
        let _ = recv(&mut creator_rx).await; // match_started
        let _ = recv(&mut joiner_rx).await;

        bed.engine
            .dispatch(
                &joiner,
                ClientRequest::LeaveRoom(LeaveRoomMsg {
                    participant_id: bed.bob,
                    room_code: code.clone(),
                }),
            )
            .await;

        // The remaining member is notified; the leaver is not
        loop {
            match recv(&mut creator_rx).await {
                ServerEvent::OpponentLeft(msg) => {
                    assert_eq!(msg.room_code, code);
                    break;
                },
                ServerEvent::PollingUpdate(_) => continue,
                other => panic!("Expected OpponentLeft, got: {other:?}"),
            }
        }

        assert!(!bed.engine.rooms().read().await.contains(&code));
        assert!(!bed.engine.scheduler().is_running(&code));
        let row = bed.engine.store().room_row(&code).await.unwrap().unwrap();
        assert_eq!(row.status, "abandoned");
        assert!(row.match_ended_at.is_some());
    }

    #[tokio::test]
    async fn leave_by_non_member_is_rejected() {
        let bed = test_bed(StubJudge::new()).await;
        let (creator, mut creator_rx) = bed.engine.open_session();
        let (outsider, mut outsider_rx) = bed.engine.open_session();
        let code = create_room(&bed, &creator, &mut creator_rx).await;

        bed.engine
            .dispatch(
                &outsider,
                ClientRequest::LeaveRoom(LeaveRoomMsg {
                    participant_id: bed.bob,
                    room_code: code.clone(),
                }),
            )
            .await;

        let ServerEvent::Error(err) = recv(&mut outsider_rx).await else {
            panic!("Expected Error");
        };
        assert_eq!(err.message, "You are not a member of this room");
        assert!(bed.engine.rooms().read().await.contains(&code));
    }

    #[tokio::test]
    async fn disconnect_during_waiting_abandons_without_poll_task() {
        let bed = test_bed(StubJudge::new()).await;
        let (creator, mut creator_rx) = bed.engine.open_session();
        let code = create_room(&bed, &creator, &mut creator_rx).await;

        bed.engine.session_disconnected(creator.id).await;

        assert!(!bed.engine.rooms().read().await.contains(&code));
        // No poll task was ever started for this room
        assert_eq!(bed.engine.scheduler().active_count(), 0);
        let row = bed.engine.store().room_row(&code).await.unwrap().unwrap();
        assert_eq!(row.status, "abandoned");
        assert!(row.match_ended_at.is_some());
        assert!(row.match_started_at.is_none());
    }

    #[tokio::test]
    async fn disconnect_of_unknown_session_is_noop() {
        let bed = test_bed(StubJudge::new()).await;
        bed.engine.session_disconnected(uuid::Uuid::new_v4()).await;
        assert_eq!(bed.engine.status().await.live_rooms, 0);
    }

    #[tokio::test]
    async fn stale_lobby_reaper_abandons_waiting_rooms() {
        let bed = test_bed(StubJudge::new()).await;
        let (creator, mut creator_rx) = bed.engine.open_session();
        let code = create_room(&bed, &creator, &mut creator_rx).await;

        // Idle timeout of zero: everything waiting is stale
        assert_eq!(bed.engine.reap_stale_lobbies().await, 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let engine = {
            let config = ServerConfig {
                rooms: crate::config::RoomsConfig {
                    idle_timeout_secs: 0,
                    idle_check_interval_secs: 60,
                },
                ..ServerConfig::default()
            };
            MatchEngine {
                config: Arc::new(config),
                ..bed.engine.clone()
            }
        };
        assert_eq!(engine.reap_stale_lobbies().await, 1);
        assert!(!engine.rooms().read().await.contains(&code));
        let row = engine.store().room_row(&code).await.unwrap().unwrap();
        assert_eq!(row.status, "abandoned");
    }
}

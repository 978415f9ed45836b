use std::time::Duration;

use tokio::sync::mpsc;

use codeduel_core::events::{
    ClientRequest, CreateRoomMsg, JoinRoomMsg, MatchEndedMsg, MatchStartedMsg, RoomCreatedMsg,
    ServerEvent,
};
use codeduel_core::room::{Difficulty, ParticipantId};
use codeduel_core::stub_judge::StubJudge;

use codeduel_server::config::{PollingConfig, ServerConfig};
use codeduel_server::engine::MatchEngine;
use codeduel_server::registry::SessionHandle;
use codeduel_server::store::MatchStore;

/// An engine over an in-memory store with two seeded accounts, polling
/// every 20 ms.
pub struct DuelHarness {
    pub engine: MatchEngine<StubJudge>,
    pub alice: ParticipantId,
    pub bob: ParticipantId,
}

impl DuelHarness {
    pub async fn new(judge: StubJudge) -> Self {
        let store = MatchStore::in_memory().await.unwrap();
        let alice = store.insert_account("alice", "alice_cf").await.unwrap();
        let bob = store.insert_account("bob", "bob_cf").await.unwrap();
        let config = ServerConfig {
            polling: PollingConfig { interval_ms: 20 },
            ..ServerConfig::default()
        };
        Self {
            engine: MatchEngine::new(config, store, judge),
            alice,
            bob,
        }
    }

    /// Create a room and return the confirmation sent to the creator.
    pub async fn create_room(
        &self,
        session: &SessionHandle,
        rx: &mut mpsc::Receiver<ServerEvent>,
        participant_id: ParticipantId,
        difficulty: Difficulty,
    ) -> RoomCreatedMsg {
        self.engine
            .dispatch(
                session,
                ClientRequest::CreateRoom(CreateRoomMsg {
                    participant_id,
                    difficulty,
                }),
            )
            .await;
        match next_event(rx).await {
            ServerEvent::RoomCreated(msg) => msg,
            other => panic!("Expected RoomCreated, got: {other:?}"),
        }
    }

    /// Join a room and return the `match_started` broadcast the joiner saw.
    pub async fn join_room(
        &self,
        session: &SessionHandle,
        rx: &mut mpsc::Receiver<ServerEvent>,
        participant_id: ParticipantId,
        room_code: &str,
    ) -> MatchStartedMsg {
        self.engine
            .dispatch(
                session,
                ClientRequest::JoinRoom(JoinRoomMsg {
                    participant_id,
                    room_code: room_code.to_string(),
                }),
            )
            .await;
        match next_event(rx).await {
            ServerEvent::MatchStarted(msg) => msg,
            other => panic!("Expected MatchStarted, got: {other:?}"),
        }
    }
}

/// Next event within a 2s deadline.
pub async fn next_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Drain events (heartbeats included) until a `match_ended` arrives.
pub async fn wait_for_match_ended(rx: &mut mpsc::Receiver<ServerEvent>) -> MatchEndedMsg {
    loop {
        if let ServerEvent::MatchEnded(msg) = next_event(rx).await {
            return msg;
        }
    }
}

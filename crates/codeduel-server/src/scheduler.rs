use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use codeduel_core::events::{MatchEndedMsg, PollingUpdateMsg, ServerEvent, SubmissionStatsMsg};
use codeduel_core::judge::{JudgeClient, SubmissionCheck};
use codeduel_core::room::{Room, RoomPhase};
use codeduel_core::submission::{AcceptedSubmission, submission_url};
use codeduel_core::time::now_millis;

use crate::registry::{Completion, SharedRegistry};
use crate::store::MatchStore;

/// Everything one poll task needs per tick.
pub struct PollContext<J: JudgeClient> {
    pub rooms: SharedRegistry,
    pub store: MatchStore,
    pub judge: Arc<J>,
}

impl<J: JudgeClient> Clone for PollContext<J> {
    fn clone(&self) -> Self {
        Self {
            rooms: Arc::clone(&self.rooms),
            store: self.store.clone(),
            judge: Arc::clone(&self.judge),
        }
    }
}

/// Owns one recurring poll task per in-progress room, keyed by room code.
///
/// A task starts when its room enters `in_progress` and stops when the
/// room leaves `in_progress` for any reason. Duplicate starts are no-ops,
/// as is stopping a task that does not exist. Stopping is safe to race an
/// in-flight tick: a tick whose room already reached a terminal phase
/// discards its result at the registry's compare-and-set.
pub struct PollScheduler {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    interval: Duration,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Start polling a room. Returns false (no-op) if a task is already
    /// running for this code.
    pub fn start<J: JudgeClient>(&self, room_code: String, ctx: PollContext<J>) -> bool {
        let mut tasks = self.tasks.lock().unwrap();
        // Tasks that finished on their own stay in the map until pruned here
        tasks.retain(|_, handle| !handle.is_finished());
        if tasks.contains_key(&room_code) {
            tracing::debug!(room = %room_code, "Poll task already running");
            return false;
        }

        let code = room_code.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            run_poll_loop(&code, interval, ctx).await;
        });
        tasks.insert(room_code.clone(), handle);
        tracing::info!(room = %room_code, active = tasks.len(), "Poll task started");
        true
    }

    /// Stop a room's poll task. Idempotent: stopping an absent or finished
    /// task is a no-op. Returns whether a live task was cancelled.
    pub fn stop(&self, room_code: &str) -> bool {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(handle) = tasks.remove(room_code) {
            let was_live = !handle.is_finished();
            handle.abort();
            if was_live {
                tracing::info!(room = %room_code, active = tasks.len(), "Poll task stopped");
            }
            was_live
        } else {
            false
        }
    }

    pub fn is_running(&self, room_code: &str) -> bool {
        self.tasks
            .lock()
            .unwrap()
            .get(room_code)
            .is_some_and(|h| !h.is_finished())
    }

    /// Live poll tasks. Total poll throughput is bounded by the shared
    /// API gate, so this doubles as the poll-queue depth gauge.
    pub fn active_count(&self) -> usize {
        self.tasks
            .lock()
            .unwrap()
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }
}

/// One room's polling loop. The first tick fires immediately.
async fn run_poll_loop<J: JudgeClient>(room_code: &str, interval: Duration, ctx: PollContext<J>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        // Re-fetch authoritative state each tick; the room may have ended
        // between ticks.
        let snapshot = {
            let rooms = ctx.rooms.read().await;
            rooms.snapshot(room_code)
        };
        let Some(room) = snapshot else {
            tracing::warn!(room = %room_code, "Room vanished while polling, stopping");
            return;
        };
        if room.phase != RoomPhase::InProgress {
            tracing::debug!(room = %room_code, phase = %room.phase, "Room left in_progress, stopping poll");
            return;
        }
        let (Some(opponent), Some(started_at)) = (room.opponent.clone(), room.started_at) else {
            tracing::warn!(room = %room_code, "In-progress room missing opponent or start time, stopping");
            return;
        };

        // Creator checked first: simultaneous accepts resolve in the
        // creator's favor. Deterministic tie-break, not iteration order.
        let contenders = [&room.creator, &opponent];
        let mut finished = false;
        for participant in contenders {
            match ctx
                .judge
                .check_recent_accept(&participant.handle, &room.problem.problem_id, started_at)
                .await
            {
                SubmissionCheck::Accepted(submission) => {
                    finalize_winner(room_code, &room, participant.id, submission, &ctx).await;
                    finished = true;
                    break;
                },
                SubmissionCheck::NoMatch => {},
                SubmissionCheck::QueryFailed(reason) => {
                    // Swallowed per tick: the next tick retries. Bounds the
                    // blast radius of upstream flakiness to one window.
                    tracing::warn!(
                        room = %room_code,
                        handle = %participant.handle,
                        error = %reason,
                        "Verdict query failed this tick"
                    );
                },
            }
        }
        if finished {
            return;
        }

        let rooms = ctx.rooms.read().await;
        rooms.broadcast_to_room(
            room_code,
            &ServerEvent::PollingUpdate(PollingUpdateMsg {
                message: "Checking for submissions...".to_string(),
                timestamp: now_millis(),
            }),
        );
    }
}

/// Completion on a verdict hit: registry transition first (the
/// compare-and-set that guarantees at most one winner), then the
/// transactional persistence, then the final broadcast.
async fn finalize_winner<J: JudgeClient>(
    room_code: &str,
    room: &Room,
    winner_id: codeduel_core::room::ParticipantId,
    submission: AcceptedSubmission,
    ctx: &PollContext<J>,
) {
    let ended_at = now_millis();
    let outcome = {
        let mut rooms = ctx.rooms.write().await;
        rooms.complete_match(room_code, winner_id, ended_at)
    };
    match outcome {
        Completion::Finalized(_) => {},
        Completion::Stale => {
            tracing::debug!(room = %room_code, "Completion raced a terminal transition, discarded");
            return;
        },
        Completion::NotFound => {
            tracing::warn!(room = %room_code, "Room vanished before completion, discarded");
            return;
        },
    }

    let winner_username = match ctx.store.fetch_identity(winner_id).await {
        Ok(Some(identity)) => identity.username,
        Ok(None) => {
            tracing::warn!(room = %room_code, winner_id, "Winner identity missing");
            winner_handle(room, winner_id)
        },
        Err(e) => {
            tracing::error!(room = %room_code, error = %e, "Identity lookup failed");
            winner_handle(room, winner_id)
        },
    };

    // A failed mirror does not roll back the in-memory completion; the
    // registry already ruled and the result is broadcast regardless.
    if let Err(e) = ctx
        .store
        .declare_winner(room_code, winner_id, ended_at, &submission)
        .await
    {
        tracing::error!(room = %room_code, error = %e, "Failed to persist winner declaration");
    }

    let event = ServerEvent::MatchEnded(MatchEndedMsg {
        room_code: room_code.to_string(),
        winner_id,
        winner_username,
        submission: SubmissionStatsMsg {
            id: submission.submission_id,
            time_ms: submission.time_ms,
            memory_bytes: submission.memory_bytes,
            language: submission.language.clone(),
            url: submission_url(room.problem.contest_id, submission.submission_id),
        },
        timestamp: ended_at,
    });

    {
        let rooms = ctx.rooms.read().await;
        rooms.broadcast_to_room(room_code, &event);
    }
    {
        let mut rooms = ctx.rooms.write().await;
        rooms.remove(room_code);
    }

    tracing::info!(
        room = %room_code,
        winner_id,
        submission = submission.submission_id,
        "Match completed"
    );
}

fn winner_handle(room: &Room, winner_id: codeduel_core::room::ParticipantId) -> String {
    if room.creator.id == winner_id {
        room.creator.handle.clone()
    } else {
        room.opponent
            .as_ref()
            .map(|o| o.handle.clone())
            .unwrap_or_else(|| format!("participant {winner_id}"))
    }
}

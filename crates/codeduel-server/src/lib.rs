//! Match orchestration engine for Codeduel.
//!
//! Pairs two participants into a timed head-to-head match on a shared
//! Codeforces problem, polls the judge for accepted submissions, and
//! fans match state out to both clients in real time. The transport
//! layer is not owned here: a host embeds [`engine::MatchEngine`], opens
//! a session per connection, and feeds it decoded requests.

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod store;

use std::time::Duration;

use codeduel_core::judge::JudgeClient;

use engine::MatchEngine;

/// Spawn the background maintenance loop: reaps idle waiting rooms and
/// logs an engine status line (live rooms, sessions, poll-queue depth)
/// every check interval.
pub fn spawn_maintenance<J: JudgeClient>(engine: MatchEngine<J>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let check = Duration::from_secs(engine.config().rooms.idle_check_interval_secs);
        let mut ticker = tokio::time::interval(check);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval fires immediately; nothing to do at startup
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let reaped = engine.reap_stale_lobbies().await;
            if reaped > 0 {
                tracing::info!(reaped, "Reaped idle waiting rooms");
            }
            let status = engine.status().await;
            tracing::debug!(
                live_rooms = status.live_rooms,
                sessions = status.sessions,
                active_polls = status.active_polls,
                "Engine status"
            );
        }
    })
}

//! The match room: one two-player game of shape reaction.
//!
//! # Phases
//!
//! ```text
//! WaitingToStart ──(start_delay)──→ RoundCountdown ──(countdown)──→ RoundActive
//!                                        ↑                              │
//!                                (next_round_delay)     correct click / round_timeout
//!                                        │                              ↓
//!                                        └──────────────────────── RoundResolved
//!                                                                       │ win_score or max_rounds
//!                                                                       ↓
//!  any non-terminal ──(disconnect / concede)──→ Aborted ──┐          GameOver
//!                                                         │             │
//!                                                         └─(return_delay)─→ ReturningToLobby → Finished
//! ```
//!
//! A deciding round skips `RoundResolved` and lands in `GameOver` directly.
//!
//! Every timed transition is a due event in the room's own [`TimerQueue`],
//! drained during the room's tick on the server loop. At most one event is
//! pending at a time; aborting cancels it, and every event handler also
//! re-checks the phase it expects.

use std::collections::HashSet;
use std::fmt;

use duelforge_protocol::{
    BOARD_CELLS, ClientMessage, ConnectionId, LeaveReason, MatchOutcome, RoomKind, SHAPES,
    ServerMessage,
};
use duelforge_tick::{TimerHandle, TimerQueue};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::lobby::CHAT_MAX_CHARS;
use crate::{MatchConfig, Members, Room, RoomContext};

// ---------------------------------------------------------------------------
// MatchId / MatchPhase
// ---------------------------------------------------------------------------

/// Identifies one match instance in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchId(u64);

impl MatchId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "match-{}", self.0)
    }
}

/// Where a match is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    WaitingToStart,
    RoundCountdown,
    RoundActive,
    RoundResolved,
    GameOver,
    Aborted,
    ReturningToLobby,
    Finished,
}

impl MatchPhase {
    /// Phases in which the game can still be played or abandoned.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::WaitingToStart | Self::RoundCountdown | Self::RoundActive | Self::RoundResolved
        )
    }
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Timed transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchEvent {
    BeginRound,
    ActivateRound,
    RoundTimeout,
    ReturnToLobby,
}

// ---------------------------------------------------------------------------
// MatchRoom
// ---------------------------------------------------------------------------

/// A single match between two players.
///
/// Created by the [`RoomManager`](crate::RoomManager) when the lobby pairs
/// two players, and reclaimed once it is no longer in progress and empty.
pub struct MatchRoom {
    id: MatchId,
    config: MatchConfig,
    members: Members,
    /// `slots[0]` is slot 1.
    slots: [ConnectionId; 2],
    /// Display names captured when the match started.
    names: [String; 2],
    phase: MatchPhase,
    round: u8,
    scores: [u8; 2],
    positions: [u8; 2],
    target_shape: u8,
    timers: TimerQueue<MatchEvent>,
    pending: Option<TimerHandle>,
    in_progress: bool,
    result_sent: bool,
    returned: HashSet<ConnectionId>,
    rng: StdRng,
}

impl MatchRoom {
    /// A match for `players`, in slot order. Call [`start`](Self::start)
    /// to seat them.
    pub fn new(id: MatchId, players: [ConnectionId; 2], config: MatchConfig) -> Self {
        Self::with_rng(id, players, config, StdRng::from_os_rng())
    }

    /// Like [`new`](Self::new) with a caller-supplied random source.
    pub fn with_rng(id: MatchId, players: [ConnectionId; 2], config: MatchConfig, rng: StdRng) -> Self {
        Self {
            id,
            config,
            members: Members::new(),
            slots: players,
            names: [String::new(), String::new()],
            phase: MatchPhase::WaitingToStart,
            round: 0,
            scores: [0, 0],
            positions: [0, 0],
            target_shape: 1,
            timers: TimerQueue::new(),
            pending: None,
            in_progress: false,
            result_sent: false,
            returned: HashSet::new(),
            rng,
        }
    }

    /// Seats both players, announces the match and schedules the first
    /// round.
    pub fn start(&mut self, ctx: &mut dyn RoomContext) {
        self.in_progress = true;
        for (slot, &id) in self.slots.iter().enumerate() {
            self.names[slot] = ctx
                .registry()
                .name(id)
                .map_or_else(|| format!("player {}", slot + 1), str::to_owned);
        }
        for id in self.slots {
            if let Err(e) = self.add_member(id, ctx) {
                warn!(match_id = %self.id, error = %e, "player not seated");
            }
        }
        info!(match_id = %self.id, p1 = %self.names[0], p2 = %self.names[1], "match created");

        // Both players hear about the match before either can be torn down.
        let mut unreachable = Vec::new();
        for (slot, id) in self.slots.into_iter().enumerate() {
            if !self.members.contains(id) {
                continue;
            }
            let start = ServerMessage::MatchStart {
                names: self.names.to_vec(),
                your_slot: slot as u8 + 1,
            };
            let joined = ServerMessage::RoomJoined { room: RoomKind::Match };
            if !(ctx.send(id, &joined) && ctx.send(id, &start)) {
                unreachable.push(id);
            }
        }
        for id in unreachable {
            self.remove_and_close(id, ctx);
        }

        if self.phase == MatchPhase::WaitingToStart {
            let at = ctx.now() + self.config.start_delay;
            self.schedule(at, MatchEvent::BeginRound);
        }
    }

    pub fn id(&self) -> MatchId {
        self.id
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn round(&self) -> u8 {
        self.round
    }

    pub fn scores(&self) -> [u8; 2] {
        self.scores
    }

    /// Cell of each shape this round; `positions()[s - 1]` holds shape `s`.
    pub fn positions(&self) -> [u8; 2] {
        self.positions
    }

    pub fn target_shape(&self) -> u8 {
        self.target_shape
    }

    /// The players in slot order, whether or not they are still seated.
    pub fn players(&self) -> [ConnectionId; 2] {
        self.slots
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Whether the one-shot result summary has gone out.
    pub fn result_sent(&self) -> bool {
        self.result_sent
    }

    /// Whether a timed transition is waiting.
    pub fn has_pending_timer(&self) -> bool {
        self.pending.is_some()
    }

    /// Done and empty: the manager may drop this match.
    pub fn is_reclaimable(&self) -> bool {
        !self.in_progress && self.members.is_empty()
    }

    fn slot_of(&self, id: ConnectionId) -> Option<usize> {
        self.slots.iter().position(|s| *s == id)
    }

    fn schedule(&mut self, at: tokio::time::Instant, event: MatchEvent) {
        self.cancel_pending();
        self.pending = Some(self.timers.schedule(at, event));
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            self.timers.cancel(handle);
        }
    }

    fn set_phase(&mut self, phase: MatchPhase) {
        debug!(match_id = %self.id, from = %self.phase, to = %phase, "phase change");
        self.phase = phase;
    }

    // -- timed transitions ------------------------------------------------

    fn handle_event(&mut self, event: MatchEvent, ctx: &mut dyn RoomContext) {
        match event {
            MatchEvent::BeginRound => self.begin_round(ctx),
            MatchEvent::ActivateRound => {
                if self.phase == MatchPhase::RoundCountdown {
                    self.set_phase(MatchPhase::RoundActive);
                    let at = ctx.now() + self.config.round_timeout;
                    self.schedule(at, MatchEvent::RoundTimeout);
                }
            }
            MatchEvent::RoundTimeout => {
                if self.phase == MatchPhase::RoundActive {
                    debug!(match_id = %self.id, round = self.round, "round timed out");
                    self.resolve_round(None, ctx);
                }
            }
            MatchEvent::ReturnToLobby => self.return_to_lobby(ctx),
        }
    }

    fn begin_round(&mut self, ctx: &mut dyn RoomContext) {
        if !matches!(self.phase, MatchPhase::WaitingToStart | MatchPhase::RoundResolved) {
            return;
        }
        self.round += 1;
        let first = self.rng.random_range(0..BOARD_CELLS);
        let mut second = self.rng.random_range(0..BOARD_CELLS - 1);
        if second >= first {
            second += 1;
        }
        self.positions = [first, second];
        self.target_shape = self.rng.random_range(1..=SHAPES);
        self.set_phase(MatchPhase::RoundCountdown);

        let countdown = self.config.countdown;
        self.broadcast(
            &ServerMessage::RoundStart {
                round: self.round,
                positions: self.positions,
                target_shape: self.target_shape,
                countdown_ms: countdown.as_millis() as u64,
            },
            ctx,
        );
        // A failed send above may already have aborted the match.
        if self.phase == MatchPhase::RoundCountdown {
            let at = ctx.now() + countdown;
            self.schedule(at, MatchEvent::ActivateRound);
        }
    }

    // -- rounds -----------------------------------------------------------

    fn click(&mut self, sender: ConnectionId, cell: u8, ctx: &mut dyn RoomContext) {
        if self.phase != MatchPhase::RoundActive {
            debug!(match_id = %self.id, conn_id = %sender, phase = %self.phase, "click outside active round");
            return;
        }
        let Some(slot) = self.slot_of(sender) else {
            return;
        };
        let target_cell = self.positions[usize::from(self.target_shape - 1)];
        if cell == target_cell {
            self.resolve_round(Some(slot), ctx);
        }
    }

    /// Ends the current round. `winner` is a slot index (0 or 1).
    ///
    /// A deciding round enters `GameOver` before anything is sent, so a
    /// player dropped by that send can no longer turn the result into an
    /// abort.
    fn resolve_round(&mut self, winner: Option<usize>, ctx: &mut dyn RoomContext) {
        self.cancel_pending();
        if let Some(slot) = winner {
            self.scores[slot] += 1;
        }

        let game_over = self.scores.iter().any(|s| *s >= self.config.win_score)
            || self.round >= self.config.max_rounds;
        let outcome = game_over.then(|| self.outcome());
        self.set_phase(if game_over {
            MatchPhase::GameOver
        } else {
            MatchPhase::RoundResolved
        });
        info!(
            match_id = %self.id,
            round = self.round,
            winner = ?winner.map(|s| s + 1),
            scores = ?self.scores,
            game_over,
            "round resolved"
        );

        self.broadcast(
            &ServerMessage::RoundResult {
                round: self.round,
                winner: winner.map(|s| s as u8 + 1),
                scores: self.scores,
                game_over,
                outcome,
            },
            ctx,
        );
        if game_over {
            self.finish_game(ctx);
        } else if self.phase == MatchPhase::RoundResolved {
            let at = ctx.now() + self.config.next_round_delay;
            self.schedule(at, MatchEvent::BeginRound);
        }
    }

    fn outcome(&self) -> MatchOutcome {
        let [a, b] = self.scores;
        match a.cmp(&b) {
            std::cmp::Ordering::Greater => MatchOutcome::Winner(1),
            std::cmp::Ordering::Less => MatchOutcome::Winner(2),
            std::cmp::Ordering::Equal => MatchOutcome::Tie,
        }
    }

    fn finish_game(&mut self, ctx: &mut dyn RoomContext) {
        let [a, b] = self.scores;
        let summary = match self.outcome() {
            MatchOutcome::Winner(slot) => format!(
                "{} beat {} {}-{}",
                self.names[usize::from(slot - 1)],
                self.names[usize::from(2 - slot)],
                a.max(b),
                a.min(b)
            ),
            MatchOutcome::Tie => format!("{} and {} tied {a}-{b}", self.names[0], self.names[1]),
        };
        self.publish_result(summary, ctx);
        let at = ctx.now() + self.config.return_delay;
        self.schedule(at, MatchEvent::ReturnToLobby);
    }

    /// Sends the match summary to the players and the lobby, once.
    fn publish_result(&mut self, summary: String, ctx: &mut dyn RoomContext) {
        if self.result_sent {
            return;
        }
        self.result_sent = true;
        info!(match_id = %self.id, %summary, "match result");
        let message = ServerMessage::GameOver { summary };
        self.broadcast(&message, ctx);
        ctx.broadcast_to_lobby(message);
    }

    // -- abort / return ---------------------------------------------------

    /// Ends a running match because `leaver` disconnected or conceded.
    /// A no-op once the match is over.
    fn abort(&mut self, leaver: ConnectionId, reason: LeaveReason, ctx: &mut dyn RoomContext) {
        if !self.in_progress || !self.phase.is_running() {
            return;
        }
        let Some(leaver_slot) = self.slot_of(leaver) else {
            return;
        };
        self.cancel_pending();
        self.set_phase(MatchPhase::Aborted);

        let winner_slot = 1 - leaver_slot;
        let leaver_name = self.names[leaver_slot].clone();
        let winner_name = self.names[winner_slot].clone();
        info!(match_id = %self.id, leaver = %leaver_name, ?reason, "match aborted");

        self.broadcast(
            &ServerMessage::PlayerLeft {
                name: leaver_name.clone(),
                reason,
                winner: winner_slot as u8 + 1,
            },
            ctx,
        );
        let verb = match reason {
            LeaveReason::Disconnected => "disconnected",
            LeaveReason::Conceded => "conceded",
        };
        self.publish_result(format!("{winner_name} wins, {leaver_name} {verb}"), ctx);

        let at = ctx.now() + self.config.return_delay;
        self.schedule(at, MatchEvent::ReturnToLobby);
    }

    /// Sends every remaining member back to the lobby and marks the match
    /// finished.
    fn return_to_lobby(&mut self, ctx: &mut dyn RoomContext) {
        if !matches!(self.phase, MatchPhase::GameOver | MatchPhase::Aborted) {
            return;
        }
        self.set_phase(MatchPhase::ReturningToLobby);
        for id in self.members.snapshot() {
            if !self.members.contains(id) || !self.returned.insert(id) {
                continue;
            }
            if !ctx.send(id, &ServerMessage::ReturningToLobby) {
                self.remove_and_close(id, ctx);
                continue;
            }
            if self.remove_member(id, ctx).is_ok() {
                ctx.enter_lobby(id);
            }
        }
        self.set_phase(MatchPhase::Finished);
        self.in_progress = false;
        info!(match_id = %self.id, "match finished");
    }
}

impl fmt::Debug for MatchRoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchRoom")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("round", &self.round)
            .field("scores", &self.scores)
            .field("members", &self.members)
            .finish()
    }
}

impl Room for MatchRoom {
    fn kind(&self) -> RoomKind {
        RoomKind::Match
    }

    fn members(&self) -> &Members {
        &self.members
    }

    fn members_mut(&mut self) -> &mut Members {
        &mut self.members
    }

    fn on_leave(&mut self, id: ConnectionId, ctx: &mut dyn RoomContext) {
        self.abort(id, LeaveReason::Disconnected, ctx);
    }

    fn dispatch(&mut self, sender: ConnectionId, message: ClientMessage, ctx: &mut dyn RoomContext) {
        match message {
            ClientMessage::Click { cell } if cell < BOARD_CELLS => self.click(sender, cell, ctx),
            ClientMessage::Click { cell } => {
                debug!(match_id = %self.id, conn_id = %sender, cell, "click off the board");
            }
            ClientMessage::Concede => self.abort(sender, LeaveReason::Conceded, ctx),
            ClientMessage::Chat { text } => {
                let from = ctx.registry().name(sender).unwrap_or("?").to_owned();
                let text = text.chars().take(CHAT_MAX_CHARS).collect();
                self.broadcast(&ServerMessage::Chat { from, text }, ctx);
            }
            ClientMessage::Leave => self.remove_and_close(sender, ctx),
            ClientMessage::HeartbeatAck => {}
            ClientMessage::SetReady { .. } | ClientMessage::Identify { .. } => {
                debug!(match_id = %self.id, conn_id = %sender, "ignoring message in match");
            }
        }
    }

    fn on_tick(&mut self, ctx: &mut dyn RoomContext) {
        let now = ctx.now();
        while let Some(event) = self.timers.pop_due(now) {
            self.pending = None;
            self.handle_event(event, ctx);
        }
    }
}

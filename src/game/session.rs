//! Session state and authoritative tick loop

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::info;
use uuid::Uuid;

use crate::registry::SessionRegistry;
use crate::util::time::{unix_millis, SIMULATION_TPS, TICK_DURATION_MICROS};
use crate::ws::protocol::{
    Avatar, Difficulty, GameMode, Obstacle, ServerMsg, SessionPhase, WinnerSummary,
};

use super::physics::{
    PhysicsSystem, BASE_SPEED, GROUND_Y, JUMP_VELOCITY, OBSTACLE_REMOVAL_X, PLAYER_X,
};
use super::snapshot::{build_snapshot, players_view};
use super::{spawner, SessionCommand};

/// Countdown starting value, decremented once per second down to 0 ("go")
pub const COUNTDOWN_START: u8 = 3;

/// Player state in a session (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: Uuid,
    pub name: String,
    pub avatar: Avatar,
    pub x: f32,
    pub y: f32,
    pub velocity: f32,
    pub jumping: bool,
    pub distance: f32,
    pub score: u32,
    pub alive: bool,
    /// Insertion index, drives the end-of-game tie-break
    pub join_order: u32,
}

impl PlayerState {
    pub fn new(id: Uuid, name: String, avatar: Avatar, join_order: u32) -> Self {
        Self {
            id,
            name,
            avatar,
            x: PLAYER_X,
            y: GROUND_Y,
            velocity: 0.0,
            jumping: false,
            distance: 0.0,
            score: 0,
            alive: true,
            join_order,
        }
    }

    /// Wire view of this player for snapshots and join confirmations
    pub fn to_view(&self) -> crate::ws::protocol::PlayerView {
        crate::ws::protocol::PlayerView {
            id: self.id,
            name: self.name.clone(),
            avatar: self.avatar,
            x: self.x,
            y: self.y,
            velocity: self.velocity,
            jumping: self.jumping,
            distance: self.distance,
            score: self.score,
            alive: self.alive,
        }
    }

    /// Wire view of a player at spawn defaults, for join replies issued
    /// before the session task has inserted the player. Join order is
    /// assigned by the session task and is not part of the view.
    pub fn spawn_view(id: Uuid, name: &str, avatar: Avatar) -> crate::ws::protocol::PlayerView {
        PlayerState::new(id, name.to_string(), avatar, 0).to_view()
    }

    /// Back to spawn defaults for a fresh run, keeping identity
    fn reset_for_run(&mut self) {
        self.y = GROUND_Y;
        self.velocity = 0.0;
        self.jumping = false;
        self.distance = 0.0;
        self.score = 0;
        self.alive = true;
    }
}

/// Events produced by a simulation tick or a lifecycle transition
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Countdown counter changed; 0 signals "go"
    Countdown(u8),
    /// Countdown completed, simulation is live
    Started,
    /// A player just died (exactly once per death)
    PlayerDied(Uuid),
    /// All players dead, run is over
    Ended(WinnerSummary),
}

/// Session state (owned by the session task)
pub struct SessionState {
    pub id: Uuid,
    pub host_name: String,
    pub mode: GameMode,
    pub difficulty: Difficulty,
    pub phase: SessionPhase,
    pub players: HashMap<Uuid, PlayerState>,
    pub join_seq: u32,
    pub obstacles: Vec<Obstacle>,
    pub speed: f32,
    pub elapsed_ticks: u64,
    /// Ticks accumulated toward the next speed increment
    pub ramp_ticks: u64,
    pub last_spawn_tick: u64,
    pub countdown: u8,
    pub countdown_ticks: u64,
    pub created_at_ms: u64,
    pub rng: ChaCha8Rng,
}

impl SessionState {
    pub fn new(
        id: Uuid,
        host_name: String,
        mode: GameMode,
        difficulty: Difficulty,
        seed: u64,
    ) -> Self {
        Self {
            id,
            host_name,
            mode,
            difficulty,
            phase: SessionPhase::Waiting,
            players: HashMap::new(),
            join_seq: 0,
            obstacles: Vec::new(),
            speed: BASE_SPEED,
            elapsed_ticks: 0,
            ramp_ticks: 0,
            last_spawn_tick: 0,
            countdown: COUNTDOWN_START,
            countdown_ticks: 0,
            created_at_ms: unix_millis(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Player slots for this session's mode
    pub fn capacity(&self) -> usize {
        match self.mode {
            GameMode::Single => 1,
            GameMode::Multi => 2,
        }
    }

    /// Insert a player, assigning the next join order
    pub fn add_player(&mut self, id: Uuid, name: String, avatar: Avatar) -> &PlayerState {
        let player = PlayerState::new(id, name, avatar, self.join_seq);
        self.join_seq += 1;
        self.players.entry(id).or_insert(player)
    }

    pub fn remove_player(&mut self, id: &Uuid) -> Option<PlayerState> {
        self.players.remove(id)
    }

    /// Start a jump. Silent no-op while airborne, dead, or outside RUNNING.
    pub fn handle_jump(&mut self, player_id: &Uuid) {
        if self.phase != SessionPhase::Running {
            return;
        }
        if let Some(player) = self.players.get_mut(player_id) {
            if player.alive && !player.jumping {
                player.velocity = JUMP_VELOCITY;
                player.jumping = true;
            }
        }
    }

    /// Enter COUNTDOWN with the timer re-armed
    pub fn begin_countdown(&mut self) {
        self.phase = SessionPhase::Countdown;
        self.countdown = COUNTDOWN_START;
        self.countdown_ticks = 0;
    }

    /// Full reset back to WAITING: obstacles cleared, speed at base,
    /// elapsed zeroed, players revived at spawn defaults.
    pub fn reset(&mut self) {
        self.phase = SessionPhase::Waiting;
        self.obstacles.clear();
        self.speed = BASE_SPEED;
        self.elapsed_ticks = 0;
        self.ramp_ticks = 0;
        self.last_spawn_tick = 0;
        self.countdown = COUNTDOWN_START;
        self.countdown_ticks = 0;
        for player in self.players.values_mut() {
            player.reset_for_run();
        }
    }

    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| p.alive).count()
    }

    /// Winner: strictly higher score, ties broken by earliest join order
    pub fn winner(&self) -> Option<WinnerSummary> {
        self.players
            .values()
            .max_by_key(|p| (p.score, std::cmp::Reverse(p.join_order)))
            .map(|p| WinnerSummary {
                player_id: p.id,
                name: p.name.clone(),
                score: p.score,
            })
    }

    /// Run one simulation tick. No-op outside COUNTDOWN/RUNNING.
    pub fn run_tick(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        match self.phase {
            SessionPhase::Waiting | SessionPhase::Ended => {}
            SessionPhase::Countdown => {
                self.countdown_ticks += 1;
                if self.countdown_ticks >= SIMULATION_TPS as u64 {
                    self.countdown_ticks = 0;
                    self.countdown -= 1;
                    events.push(SessionEvent::Countdown(self.countdown));
                    if self.countdown == 0 {
                        self.phase = SessionPhase::Running;
                        events.push(SessionEvent::Started);
                    }
                }
            }
            SessionPhase::Running => {
                self.elapsed_ticks += 1;

                // Speed ramp: fires exactly once per 10 elapsed seconds
                let (speed, ramp_ticks) =
                    PhysicsSystem::step_speed_ramp(self.speed, self.ramp_ticks);
                self.speed = speed;
                self.ramp_ticks = ramp_ticks;

                // Player motion and scoring; dead players are frozen
                for player in self.players.values_mut() {
                    if !player.alive {
                        continue;
                    }

                    let (y, velocity, jumping) =
                        PhysicsSystem::step_jump(player.y, player.velocity, player.jumping);
                    player.y = y;
                    player.velocity = velocity;
                    player.jumping = jumping;

                    player.distance += self.speed;
                    player.score = (player.distance / 10.0) as u32;
                }

                // Timed obstacle spawn
                if let Some(obstacle) = spawner::maybe_spawn(
                    &mut self.rng,
                    self.mode,
                    self.difficulty,
                    self.elapsed_ticks,
                    self.last_spawn_tick,
                ) {
                    self.obstacles.push(obstacle);
                    self.last_spawn_tick = self.elapsed_ticks;
                }

                // Scroll and drop off-screen obstacles, order preserved
                for obstacle in &mut self.obstacles {
                    obstacle.x -= self.speed;
                }
                self.obstacles.retain(|o| o.x > OBSTACLE_REMOVAL_X);

                // Collisions: mark newly dead players, once each
                for player in self.players.values_mut() {
                    if !player.alive {
                        continue;
                    }
                    for obstacle in &self.obstacles {
                        if PhysicsSystem::player_hits_obstacle(
                            player.y,
                            obstacle.x,
                            obstacle.y,
                            obstacle.width,
                            obstacle.height,
                        ) {
                            player.alive = false;
                            events.push(SessionEvent::PlayerDied(player.id));
                            break;
                        }
                    }
                }

                // End of run once every player is dead
                if !self.players.is_empty() && self.alive_count() == 0 {
                    self.phase = SessionPhase::Ended;
                    if let Some(winner) = self.winner() {
                        events.push(SessionEvent::Ended(winner));
                    }
                }
            }
        }

        events
    }
}

/// Handle to a running session task
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub cmd_tx: mpsc::Sender<SessionCommand>,
    pub broadcast_tx: broadcast::Sender<ServerMsg>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.broadcast_tx.subscribe()
    }
}

/// The authoritative session task: owns the state, drains the command
/// queue before each tick, broadcasts snapshots fire-and-forget.
pub struct GameSession {
    state: SessionState,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    broadcast_tx: broadcast::Sender<ServerMsg>,
    registry: Arc<SessionRegistry>,
}

impl GameSession {
    pub fn new(state: SessionState, registry: Arc<SessionRegistry>) -> (Self, SessionHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (broadcast_tx, _) = broadcast::channel(256);

        let handle = SessionHandle {
            id: state.id,
            cmd_tx,
            broadcast_tx: broadcast_tx.clone(),
        };

        let session = Self {
            state,
            cmd_rx,
            broadcast_tx,
            registry,
        };

        (session, handle)
    }

    /// Run the session task until the player set empties
    pub async fn run(mut self) {
        info!(session_id = %self.state.id, mode = ?self.state.mode, "Session task started");

        // A single-mode session is full at creation
        if self.state.players.len() == self.state.capacity() {
            self.start_countdown();
        }

        let tick_duration = Duration::from_micros(TICK_DURATION_MICROS);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            // Drain the command queue before ticking
            if !self.process_commands() {
                break;
            }

            let events = self.state.run_tick();

            let mut ended = None;
            for event in events {
                match event {
                    SessionEvent::Countdown(value) => {
                        self.publish(ServerMsg::Countdown { value });
                    }
                    SessionEvent::Started => {
                        info!(session_id = %self.state.id, "Run started");
                    }
                    SessionEvent::PlayerDied(player_id) => {
                        info!(session_id = %self.state.id, player_id = %player_id, "Player died");
                        self.publish(ServerMsg::PlayerDied { player_id });
                    }
                    SessionEvent::Ended(winner) => {
                        ended = Some(winner);
                    }
                }
            }

            // Snapshot every running tick, plus a final one on the ending tick
            if self.state.phase == SessionPhase::Running || ended.is_some() {
                self.publish(ServerMsg::StateUpdate {
                    snapshot: build_snapshot(&self.state),
                });
            }

            if let Some(winner) = ended {
                info!(
                    session_id = %self.state.id,
                    winner = %winner.name,
                    score = winner.score,
                    "Session ended"
                );
                self.publish(ServerMsg::SessionEnded { winner });
            }
        }

        info!(session_id = %self.state.id, "Session task stopped");
    }

    /// Apply all pending commands. Returns false once the session is empty
    /// and the task should stop.
    fn process_commands(&mut self) -> bool {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                SessionCommand::AddPlayer {
                    player_id,
                    name,
                    avatar,
                } => self.handle_add_player(player_id, name, avatar),
                SessionCommand::Jump { player_id } => self.state.handle_jump(&player_id),
                SessionCommand::Restart => self.handle_restart(),
                SessionCommand::Leave { player_id } => {
                    if !self.handle_leave(player_id) {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn handle_add_player(&mut self, player_id: Uuid, name: String, avatar: Avatar) {
        self.state.add_player(player_id, name, avatar);

        info!(
            session_id = %self.state.id,
            player_id = %player_id,
            player_count = self.state.players.len(),
            "Player joined session"
        );

        self.publish(ServerMsg::PlayersUpdated {
            players: players_view(&self.state),
        });

        if self.state.phase == SessionPhase::Waiting
            && self.state.players.len() == self.state.capacity()
        {
            self.start_countdown();
        }
    }

    fn handle_restart(&mut self) {
        self.state.reset();
        self.publish(ServerMsg::SessionReset);

        self.registry
            .on_session_reset(&self.state.id, self.state.players.len());

        info!(session_id = %self.state.id, "Session reset to waiting");

        // Slots still full: the same players go straight into a new run
        if self.state.players.len() == self.state.capacity() {
            self.start_countdown();
        }
    }

    /// Returns false when the session emptied and should be destroyed
    fn handle_leave(&mut self, player_id: Uuid) -> bool {
        if self.state.remove_player(&player_id).is_none() {
            return true;
        }

        let remaining = self.state.players.len();
        info!(
            session_id = %self.state.id,
            player_id = %player_id,
            remaining,
            "Player left session"
        );

        self.registry
            .on_player_left(&self.state.id, &player_id, remaining);

        if remaining == 0 {
            return false;
        }

        self.publish(ServerMsg::PlayersUpdated {
            players: players_view(&self.state),
        });
        true
    }

    fn start_countdown(&mut self) {
        self.state.begin_countdown();
        self.registry.on_session_started(&self.state.id);
        self.publish(ServerMsg::SessionStarted);
        self.publish(ServerMsg::Countdown {
            value: self.state.countdown,
        });
        info!(session_id = %self.state.id, "Countdown started");
    }

    /// Fire-and-forget: a slow subscriber never delays the tick
    fn publish(&self, msg: ServerMsg) {
        let _ = self.broadcast_tx.send(msg);
    }
}

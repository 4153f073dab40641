//! Attendance tracking for the watched user's voice channel
//!
//! Raw voice-state events are debounced through a small state machine:
//! a join only becomes a voice connect after the user has stayed for
//! [`JOIN_DEBOUNCE`], and a leave only becomes a disconnect after
//! [`LEAVE_DEBOUNCE`] without a rejoin. The machine itself is pure and
//! synchronous; [`PresenceWatcher`] drives it with tokio timers.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How long the user must stay in the channel before the bot joins
pub const JOIN_DEBOUNCE: Duration = Duration::from_secs(5);

/// How long the user must stay gone before the bot leaves
pub const LEAVE_DEBOUNCE: Duration = Duration::from_secs(180);

/// Attendance of the tracked user in the tracked voice channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceState {
    /// User not in the channel, bot disconnected
    Absent,
    /// User just joined; join timer running
    PendingJoin,
    /// User settled in the channel, bot connected
    Present,
    /// User just left; leave timer running
    PendingLeave,
}

/// A voice-state transition of the tracked user on the tracked channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEvent {
    /// The user entered the channel
    Joined,
    /// The user left the channel
    Left,
}

/// Which debounce timer a fire belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerFamily {
    /// The 5-second join debounce
    Join,
    /// The 180-second leave debounce
    Leave,
}

/// Side effect requested by a machine transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Start the join timer; fires must carry this epoch
    ArmJoin {
        /// Epoch the armed timer must present when firing
        epoch: u64,
    },
    /// Abort any running join timer
    CancelJoin,
    /// Start the leave timer; fires must carry this epoch
    ArmLeave {
        /// Epoch the armed timer must present when firing
        epoch: u64,
    },
    /// Abort any running leave timer
    CancelLeave,
    /// Join the voice channel and open a conversation cycle
    Connect,
    /// Tear down the voice connection
    Disconnect,
}

/// Pure attendance state machine
///
/// Per-family epoch counters implement atomic supersession: every arm
/// or cancel bumps the epoch, and a timer fire carrying a stale epoch
/// is discarded. At most one join and one leave timer can therefore be
/// live at a time, and a cancelled timer can never produce an action.
#[derive(Debug)]
pub struct AttendanceMachine {
    state: AttendanceState,
    join_epoch: u64,
    leave_epoch: u64,
}

impl Default for AttendanceMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AttendanceMachine {
    /// Fresh machine; attendance always starts `Absent` (no recovery
    /// reconciliation after a restart)
    pub fn new() -> Self {
        Self {
            state: AttendanceState::Absent,
            join_epoch: 0,
            leave_epoch: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> AttendanceState {
        self.state
    }

    /// Apply a voice event, returning the effects to perform
    pub fn on_event(&mut self, event: VoiceEvent) -> Vec<Effect> {
        use AttendanceState::*;
        use VoiceEvent::*;

        match (self.state, event) {
            (Absent, Joined) => {
                self.state = PendingJoin;
                self.join_epoch += 1;
                vec![Effect::ArmJoin {
                    epoch: self.join_epoch,
                }]
            }
            (PendingJoin, Left) => {
                self.state = Absent;
                self.join_epoch += 1;
                vec![Effect::CancelJoin]
            }
            (Present, Left) => {
                self.state = PendingLeave;
                self.leave_epoch += 1;
                vec![Effect::ArmLeave {
                    epoch: self.leave_epoch,
                }]
            }
            (PendingLeave, Joined) => {
                self.state = Present;
                self.leave_epoch += 1;
                vec![Effect::CancelLeave]
            }
            // Same-direction duplicates carry no new information.
            (PendingJoin, Joined) | (Present, Joined) | (Absent, Left) | (PendingLeave, Left) => {
                Vec::new()
            }
        }
    }

    /// Apply a timer fire; `None` when the timer is stale or the state
    /// has moved on
    pub fn on_timer(&mut self, family: TimerFamily, epoch: u64) -> Option<Effect> {
        use AttendanceState::*;
        match family {
            TimerFamily::Join => {
                if self.state == PendingJoin && epoch == self.join_epoch {
                    self.state = Present;
                    Some(Effect::Connect)
                } else {
                    None
                }
            }
            TimerFamily::Leave => {
                if self.state == PendingLeave && epoch == self.leave_epoch {
                    self.state = Absent;
                    Some(Effect::Disconnect)
                } else {
                    None
                }
            }
        }
    }
}

/// Actions the watcher triggers when a debounce elapses
#[async_trait]
pub trait PresenceActions: Send + Sync {
    /// Join the tracked voice channel and start a conversation cycle
    async fn connect(&self);
    /// Release the voice connection
    async fn disconnect(&self);
}

struct WatcherInner {
    machine: AttendanceMachine,
    join_timer: Option<JoinHandle<()>>,
    leave_timer: Option<JoinHandle<()>>,
}

struct WatcherShared<A: PresenceActions + 'static> {
    inner: Mutex<WatcherInner>,
    actions: Arc<A>,
}

/// Async driver for the attendance machine
///
/// One mutex serializes gateway events against timer fires, so action
/// callbacks never run concurrently for the same channel and a timer
/// cancellation always happens before the replacement timer is armed.
/// Clones are handles onto the same machine.
pub struct PresenceWatcher<A: PresenceActions + 'static> {
    shared: Arc<WatcherShared<A>>,
}

impl<A: PresenceActions + 'static> Clone for PresenceWatcher<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: PresenceActions + 'static> PresenceWatcher<A> {
    /// Create a watcher over the given action sink
    pub fn new(actions: Arc<A>) -> Self {
        Self {
            shared: Arc::new(WatcherShared {
                inner: Mutex::new(WatcherInner {
                    machine: AttendanceMachine::new(),
                    join_timer: None,
                    leave_timer: None,
                }),
                actions,
            }),
        }
    }

    /// Current attendance state
    pub async fn state(&self) -> AttendanceState {
        self.shared.inner.lock().await.machine.state()
    }

    /// Feed a voice event for the tracked user
    pub async fn handle_event(&self, event: VoiceEvent) {
        let mut inner = self.shared.inner.lock().await;
        let effects = inner.machine.on_event(event);
        debug!(?event, ?effects, state = ?inner.machine.state(), "attendance event");
        for effect in effects {
            self.apply(&mut inner, effect).await;
        }
    }

    async fn apply(&self, inner: &mut WatcherInner, effect: Effect) {
        match effect {
            Effect::ArmJoin { epoch } => {
                if let Some(handle) = inner.join_timer.take() {
                    handle.abort();
                }
                let watcher = self.clone();
                inner.join_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(JOIN_DEBOUNCE).await;
                    watcher.fire(TimerFamily::Join, epoch).await;
                }));
            }
            Effect::CancelJoin => {
                if let Some(handle) = inner.join_timer.take() {
                    handle.abort();
                }
            }
            Effect::ArmLeave { epoch } => {
                if let Some(handle) = inner.leave_timer.take() {
                    handle.abort();
                }
                let watcher = self.clone();
                inner.leave_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(LEAVE_DEBOUNCE).await;
                    watcher.fire(TimerFamily::Leave, epoch).await;
                }));
            }
            Effect::CancelLeave => {
                if let Some(handle) = inner.leave_timer.take() {
                    handle.abort();
                }
            }
            Effect::Connect => {
                info!("join debounce elapsed, connecting");
                self.shared.actions.connect().await;
            }
            Effect::Disconnect => {
                info!("leave debounce elapsed, disconnecting");
                self.shared.actions.disconnect().await;
            }
        }
    }

    // Timer fires can only yield Connect/Disconnect, so they are handled
    // inline rather than through `apply` (which spawns tasks that call
    // back into this function).
    async fn fire(&self, family: TimerFamily, epoch: u64) {
        let mut inner = self.shared.inner.lock().await;
        match inner.machine.on_timer(family, epoch) {
            Some(Effect::Connect) => {
                inner.join_timer = None;
                info!("join debounce elapsed, connecting");
                self.shared.actions.connect().await;
            }
            Some(Effect::Disconnect) => {
                inner.leave_timer = None;
                info!("leave debounce elapsed, disconnecting");
                self.shared.actions.disconnect().await;
            }
            Some(_) | None => {
                debug!(?family, epoch, "stale timer fire discarded");
            }
        }
    }
}

/// Change reported by a presence update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameChange {
    /// Same activity as before
    Unchanged,
    /// The user started playing the named game
    Started(String),
    /// The user stopped playing
    Stopped,
    /// The user switched to the named game
    Switched(String),
}

/// The independent "game being played" gate
///
/// Tracked separately from attendance; unprompted chatter only runs
/// while a game is active AND the bot is connected.
#[derive(Debug, Default)]
pub struct GameActivity {
    current: RwLock<Option<String>>,
}

impl GameActivity {
    /// Fresh gate with no active game
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest activity and classify the change
    pub fn update(&self, game: Option<String>) -> GameChange {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let change = match (current.as_deref(), game.as_deref()) {
            (None, None) => GameChange::Unchanged,
            (Some(old), Some(new)) if old == new => GameChange::Unchanged,
            (None, Some(new)) => GameChange::Started(new.to_string()),
            (Some(_), None) => GameChange::Stopped,
            (Some(_), Some(new)) => GameChange::Switched(new.to_string()),
        };
        if change != GameChange::Unchanged {
            *current = game;
        }
        change
    }

    /// The game currently being played, if any
    pub fn current(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether the gate is open
    pub fn is_playing(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_arms_timer_once() {
        let mut machine = AttendanceMachine::new();
        let effects = machine.on_event(VoiceEvent::Joined);
        assert_eq!(effects, vec![Effect::ArmJoin { epoch: 1 }]);
        assert_eq!(machine.state(), AttendanceState::PendingJoin);
        // Duplicate join is a no-op
        assert!(machine.on_event(VoiceEvent::Joined).is_empty());
    }

    #[test]
    fn test_leave_before_join_timer_cancels() {
        let mut machine = AttendanceMachine::new();
        machine.on_event(VoiceEvent::Joined);
        let effects = machine.on_event(VoiceEvent::Left);
        assert_eq!(effects, vec![Effect::CancelJoin]);
        assert_eq!(machine.state(), AttendanceState::Absent);
        // The armed timer (epoch 1) is now stale
        assert_eq!(machine.on_timer(TimerFamily::Join, 1), None);
    }

    #[test]
    fn test_join_timer_fires_connect() {
        let mut machine = AttendanceMachine::new();
        machine.on_event(VoiceEvent::Joined);
        assert_eq!(
            machine.on_timer(TimerFamily::Join, 1),
            Some(Effect::Connect)
        );
        assert_eq!(machine.state(), AttendanceState::Present);
    }

    #[test]
    fn test_rejoin_cancels_leave_timer() {
        let mut machine = AttendanceMachine::new();
        machine.on_event(VoiceEvent::Joined);
        machine.on_timer(TimerFamily::Join, 1);
        let effects = machine.on_event(VoiceEvent::Left);
        assert_eq!(effects, vec![Effect::ArmLeave { epoch: 1 }]);
        let effects = machine.on_event(VoiceEvent::Joined);
        assert_eq!(effects, vec![Effect::CancelLeave]);
        assert_eq!(machine.state(), AttendanceState::Present);
        assert_eq!(machine.on_timer(TimerFamily::Leave, 1), None);
    }

    #[test]
    fn test_leave_timer_fires_disconnect() {
        let mut machine = AttendanceMachine::new();
        machine.on_event(VoiceEvent::Joined);
        machine.on_timer(TimerFamily::Join, 1);
        machine.on_event(VoiceEvent::Left);
        assert_eq!(
            machine.on_timer(TimerFamily::Leave, 1),
            Some(Effect::Disconnect)
        );
        assert_eq!(machine.state(), AttendanceState::Absent);
    }

    #[test]
    fn test_rapid_toggle_supersedes_previous_timer() {
        let mut machine = AttendanceMachine::new();
        // join/leave/join inside the debounce window
        machine.on_event(VoiceEvent::Joined); // epoch 1
        machine.on_event(VoiceEvent::Left); // cancels, epoch 2
        let effects = machine.on_event(VoiceEvent::Joined); // arms epoch 3
        assert_eq!(effects, vec![Effect::ArmJoin { epoch: 3 }]);
        // The first timer can never connect
        assert_eq!(machine.on_timer(TimerFamily::Join, 1), None);
        // Only the current epoch does
        assert_eq!(
            machine.on_timer(TimerFamily::Join, 3),
            Some(Effect::Connect)
        );
    }

    #[test]
    fn test_stray_left_in_absent_is_noop() {
        let mut machine = AttendanceMachine::new();
        assert!(machine.on_event(VoiceEvent::Left).is_empty());
        assert_eq!(machine.state(), AttendanceState::Absent);
    }

    #[test]
    fn test_game_activity_changes() {
        let gate = GameActivity::new();
        assert!(!gate.is_playing());
        assert_eq!(gate.update(None), GameChange::Unchanged);
        assert_eq!(
            gate.update(Some("Elden Ring".to_string())),
            GameChange::Started("Elden Ring".to_string())
        );
        assert!(gate.is_playing());
        assert_eq!(gate.update(Some("Elden Ring".to_string())), GameChange::Unchanged);
        assert_eq!(
            gate.update(Some("Factorio".to_string())),
            GameChange::Switched("Factorio".to_string())
        );
        assert_eq!(gate.current(), Some("Factorio".to_string()));
        assert_eq!(gate.update(None), GameChange::Stopped);
        assert!(!gate.is_playing());
    }
}

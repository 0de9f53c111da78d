//! Door actuation gate.
//!
//! A single driver task owns the door: it consumes match events, runs
//! the open/hold/close cycle, and debounces everything that arrives
//! while a cycle or cool-down is in progress. All timers are wall-clock;
//! a recognized face holds the door for a fixed duration no matter how
//! many further matches arrive.

use crate::actuator::{Actuator, DoorCommand};
use crate::audit::{AccessRecord, AuditSink};
use crate::pipeline::MatchEvent;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Opening,
    Holding,
    Closing,
    CoolingDown,
}

/// Pure door-cycle state machine. Time is passed in so the transitions
/// can be tested without waiting.
pub struct DoorGate {
    state: GateState,
    hold: Duration,
    cooldown: Duration,
    cool_until: Option<Instant>,
}

impl DoorGate {
    pub fn new(hold: Duration, cooldown: Duration) -> Self {
        Self {
            state: GateState::Idle,
            hold,
            cooldown,
            cool_until: None,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// A known identity was matched. Returns true when a new cycle
    /// begins and the caller must issue the open command; matches during
    /// a cycle or an unexpired cool-down are dropped.
    pub fn on_match(&mut self, now: Instant) -> bool {
        if self.state == GateState::CoolingDown
            && self.cool_until.map_or(true, |until| now >= until)
        {
            self.state = GateState::Idle;
            self.cool_until = None;
        }

        if self.state == GateState::Idle {
            self.state = GateState::Opening;
            true
        } else {
            false
        }
    }

    /// Open command issued; returns the deadline until which the door
    /// stays open.
    pub fn opened(&mut self, now: Instant) -> Instant {
        self.state = GateState::Holding;
        now + self.hold
    }

    /// Hold expired; the close command is about to be issued.
    pub fn closing(&mut self) {
        self.state = GateState::Closing;
    }

    /// Close command issued; enter the cool-down window.
    pub fn closed(&mut self, now: Instant) {
        self.state = GateState::CoolingDown;
        self.cool_until = Some(now + self.cooldown);
    }
}

/// Owns the event receiver and the actuator; the sole serialization
/// point for door commands.
pub struct GateDriver<A: Actuator, S: AuditSink> {
    gate: DoorGate,
    events: mpsc::Receiver<MatchEvent>,
    actuator: A,
    audit: Option<S>,
    shutdown: watch::Receiver<bool>,
}

impl<A: Actuator, S: AuditSink> GateDriver<A, S> {
    pub fn new(
        gate: DoorGate,
        events: mpsc::Receiver<MatchEvent>,
        actuator: A,
        audit: Option<S>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gate,
            events,
            actuator,
            audit,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            let event = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let Some(identity) = event.identity.clone() else {
                tracing::debug!(seq = event.frame_sequence, "unknown face; no actuation");
                continue;
            };

            if !self.gate.on_match(Instant::now()) {
                tracing::debug!(
                    state = ?self.gate.state(),
                    %identity,
                    "match dropped; cycle in progress"
                );
                continue;
            }

            tracing::info!(
                %identity,
                distance = ?event.distance,
                seq = event.frame_sequence,
                "access granted; opening door"
            );
            self.issue(DoorCommand::Open).await;
            let deadline = self.gate.opened(Instant::now());

            let interrupted = self.hold_until(deadline).await;

            self.gate.closing();
            tracing::info!(%identity, "hold elapsed; closing door");
            self.issue(DoorCommand::Close).await;
            self.gate.closed(Instant::now());

            self.emit_audit(identity, &event).await;

            if interrupted {
                tracing::warn!("shutdown during door cycle; close was issued");
                break;
            }
        }

        tracing::info!("actuation gate stopped");
    }

    /// Wait out the hold window, draining and dropping events that
    /// arrive while the door is already open. Returns true if shutdown
    /// cut the hold short.
    async fn hold_until(&mut self, deadline: Instant) -> bool {
        let mut events_open = true;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return true;
                    }
                }
                event = self.events.recv(), if events_open => match event {
                    Some(event) => tracing::debug!(
                        seq = event.frame_sequence,
                        "match dropped; door already open"
                    ),
                    None => events_open = false,
                },
            }
        }
    }

    async fn issue(&self, command: DoorCommand) {
        // The cycle timers keep running on failure so the close attempt
        // still happens at the scheduled time.
        if let Err(e) = self.actuator.send(command).await {
            tracing::warn!(?command, error = %e, "actuator command failed");
        }
    }

    async fn emit_audit(&self, identity: String, event: &MatchEvent) {
        let Some(sink) = &self.audit else {
            return;
        };
        let record = AccessRecord {
            identity,
            timestamp: chrono::Utc::now().timestamp_millis(),
            frame_sequence: event.frame_sequence,
        };
        if let Err(e) = sink.record(record).await {
            tracing::warn!(error = %e, "audit record failed; continuing");
        }
    }
}

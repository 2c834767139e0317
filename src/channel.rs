//! Typed host/worker queues.
//!
//! Commands flow host → worker, events flow worker → host. Both directions are
//! unbounded FIFO queues, so a send never blocks and events from a single
//! producer arrive in the order they were sent.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::ChannelError;
use crate::protocol::{Command, Event};

/// Inbound unit on the worker side: a typed command or raw wire bytes
#[derive(Debug, Clone)]
pub enum Inbound {
    Command(Command),
    Raw(Vec<u8>),
}

/// Create a connected host/worker pair
pub fn channel() -> (HostEndpoint, WorkerEndpoint) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (
        HostEndpoint {
            commands: command_tx,
            events: event_rx,
        },
        WorkerEndpoint {
            inbound: command_rx,
            events: EventSender { tx: event_tx },
        },
    )
}

/// Host side: submit commands, consume events
#[derive(Debug)]
pub struct HostEndpoint {
    commands: mpsc::UnboundedSender<Inbound>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl HostEndpoint {
    pub fn send(&self, command: Command) -> Result<(), ChannelError> {
        self.commands
            .send(Inbound::Command(command))
            .map_err(|_| ChannelError::Closed)
    }

    /// Forward an undecoded wire payload; the worker parses it
    pub fn send_raw(&self, payload: impl Into<Vec<u8>>) -> Result<(), ChannelError> {
        self.commands
            .send(Inbound::Raw(payload.into()))
            .map_err(|_| ChannelError::Closed)
    }

    /// Next event, or `None` once the worker is gone
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Next event within the liveness window.
    ///
    /// Silence past the window is a transport fault, not a protocol violation.
    pub async fn recv_within(&mut self, liveness: Duration) -> Result<Event, ChannelError> {
        match tokio::time::timeout(liveness, self.events.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(ChannelError::Closed),
            Err(_) => Err(ChannelError::Silent(liveness.as_millis() as u64)),
        }
    }

    /// Drain events until the terminal event for `cycle_id` arrives.
    /// Events from other cycles are returned too, in arrival order.
    pub async fn collect_cycle(
        &mut self,
        cycle_id: &str,
        liveness: Duration,
    ) -> Result<Vec<Event>, ChannelError> {
        let mut events = Vec::new();
        loop {
            let event = self.recv_within(liveness).await?;
            let done = event.is_terminal() && event.cycle_id() == Some(cycle_id);
            events.push(event);
            if done {
                return Ok(events);
            }
        }
    }
}

/// Worker side of the channel
#[derive(Debug)]
pub struct WorkerEndpoint {
    pub(crate) inbound: mpsc::UnboundedReceiver<Inbound>,
    pub(crate) events: EventSender,
}

impl WorkerEndpoint {
    pub fn event_sender(&self) -> EventSender {
        self.events.clone()
    }
}

/// Non-blocking event publisher shared by the worker and running cycles
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Wrap a raw sender, e.g. for in-process tests
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Publish an event. Returns false if the host has gone away.
    pub fn send(&self, event: Event) -> bool {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(()) => true,
            Err(_) => {
                warn!(event = kind, "host disconnected, dropping event");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

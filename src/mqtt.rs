use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::config::MqttConfig;
use crate::metrics::CycleMetrics;
use crate::protocol::Event;
use crate::render::{Rendered, TextRenderer};

/// Event as published to the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub agent_id: String,
    pub event: Event,
    /// Rendered insight content, when the event carries any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered: Option<Rendered>,
    pub timestamp: u64,
}

/// Heartbeat as published to the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: String,
    pub metrics: CycleMetrics,
    pub outstanding: Vec<String>,
    pub timestamp: u64,
}

pub fn command_topic(agent_id: &str) -> String {
    format!("evoclaw/agents/{}/commands", agent_id)
}

pub fn event_topic(agent_id: &str) -> String {
    format!("evoclaw/agents/{}/events", agent_id)
}

pub fn heartbeat_topic(agent_id: &str) -> String {
    format!("evoclaw/agents/{}/heartbeat", agent_id)
}

fn unix_now() -> Result<u64, Box<dyn std::error::Error>> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs())
}

/// Wrap an event for publishing, rendering insight content on the way out
pub fn envelope(
    agent_id: &str,
    event: Event,
    renderer: &TextRenderer,
) -> Result<EventEnvelope, Box<dyn std::error::Error>> {
    let rendered = match &event {
        Event::InsightGenerated { content, .. } => Some(renderer.render(content)),
        _ => None,
    };
    Ok(EventEnvelope {
        agent_id: agent_id.to_string(),
        event,
        rendered,
        timestamp: unix_now()?,
    })
}

/// Bridges the worker channel onto an MQTT broker
pub struct MqttBridge {
    client: AsyncClient,
    agent_id: String,
    renderer: TextRenderer,
}

impl MqttBridge {
    /// Create a new MQTT bridge
    pub fn new(
        config: &MqttConfig,
        agent_id: String,
        renderer: TextRenderer,
    ) -> Result<(Self, EventLoop), Box<dyn std::error::Error>> {
        let mut mqttoptions =
            MqttOptions::new(format!("evoclaw-cognition-{}", agent_id), &config.broker, config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        Ok((
            Self {
                client,
                agent_id,
                renderer,
            },
            eventloop,
        ))
    }

    /// Subscribe to the command topic
    pub async fn subscribe(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.client
            .subscribe(command_topic(&self.agent_id), QoS::AtLeastOnce)
            .await?;

        info!(agent_id = %self.agent_id, "subscribed to MQTT topics");
        Ok(())
    }

    /// Publish a worker event
    pub async fn publish_event(&self, event: Event) -> Result<(), Box<dyn std::error::Error>> {
        let envelope = envelope(&self.agent_id, event, &self.renderer)?;
        let payload = serde_json::to_vec(&envelope)?;
        self.client
            .publish(event_topic(&self.agent_id), QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    /// Publish a heartbeat with metrics
    pub async fn publish_heartbeat(
        &self,
        metrics: CycleMetrics,
        outstanding: Vec<String>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let heartbeat = Heartbeat {
            agent_id: self.agent_id.clone(),
            metrics,
            outstanding,
            timestamp: unix_now()?,
        };
        let payload = serde_json::to_vec(&heartbeat)?;
        self.client
            .publish(heartbeat_topic(&self.agent_id), QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}

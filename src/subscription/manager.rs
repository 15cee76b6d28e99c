use crate::building::StatusReported;
use crate::error::EntityError;
use crate::hub::SensorHub;
use crate::subscription::protocol::{ClientMessage, ErrorMessage, StatusReportedMessage};
use axum::extract::ws::{Message, WebSocket};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Manages one WebSocket connection subscribed to one building
pub struct ConnectionManager {
    hub: Arc<SensorHub>,
    building_id: i64,
    subscription_id: Uuid,
}

impl ConnectionManager {
    pub fn new(hub: Arc<SensorHub>, building_id: i64, subscription_id: Uuid) -> Self {
        Self {
            hub,
            building_id,
            subscription_id,
        }
    }

    /// Forward status events until either side goes away, then unsubscribe.
    pub async fn handle(self, mut socket: WebSocket, mut events: mpsc::Receiver<StatusReported>) {
        info!(
            building_id = self.building_id,
            subscription = %self.subscription_id,
            "WebSocket connection established"
        );

        loop {
            tokio::select! {
                // Handle incoming client messages
                msg = socket.recv() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_client_message(&mut socket, &text).await {
                                error!(error = %e, "Error handling client message");
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!(building_id = self.building_id, "WebSocket client disconnected");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = socket.send(Message::Pong(data)).await {
                                error!(error = %e, "Failed to send pong");
                                break;
                            }
                        }
                        Some(Ok(_)) => {
                            // Ignore binary, pong messages
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                        None => {
                            info!(building_id = self.building_id, "WebSocket stream ended");
                            break;
                        }
                    }
                }

                // Events published by the building
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = send_status(&mut socket, event).await {
                                error!(error = %e, "Failed to send status update");
                                break;
                            }
                        }
                        None => {
                            // Building deactivated and dropped its subscribers
                            info!(building_id = self.building_id, "Status channel closed");
                            break;
                        }
                    }
                }
            }
        }

        match self
            .hub
            .unsubscribe(self.building_id, self.subscription_id)
            .await
        {
            Ok(removed) => debug!(
                building_id = self.building_id,
                subscription = %self.subscription_id,
                removed = removed,
                "Subscription released"
            ),
            Err(e) => warn!(
                building_id = self.building_id,
                error = %e,
                "Failed to unsubscribe closed connection"
            ),
        }

        info!(building_id = self.building_id, "WebSocket connection closed");
    }

    async fn handle_client_message(&self, socket: &mut WebSocket, text: &str) -> anyhow::Result<()> {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                let reply = ErrorMessage::new(format!("invalid message: {}", e));
                socket
                    .send(Message::Text(serde_json::to_string(&reply)?))
                    .await?;
                return Ok(());
            }
        };

        match msg {
            ClientMessage::Status => {
                let result = self.hub.building_status(self.building_id).await;
                if let Err(e) = &result {
                    warn!(building_id = self.building_id, error = %e, "Status request failed");
                }
                let reply = status_reply(self.building_id, result)?;
                socket.send(Message::Text(reply)).await?;
            }
        }

        Ok(())
    }
}

/// Reply frame for a client status request: the snapshot, or an error frame.
fn status_reply(
    building_id: i64,
    result: Result<BTreeMap<String, f64>, EntityError>,
) -> serde_json::Result<String> {
    match result {
        Ok(status) => serde_json::to_string(&StatusReportedMessage::from(StatusReported {
            building_id,
            status,
        })),
        Err(e) => serde_json::to_string(&ErrorMessage::new(format!("status unavailable: {}", e))),
    }
}

async fn send_status(socket: &mut WebSocket, event: StatusReported) -> anyhow::Result<()> {
    let msg = StatusReportedMessage::from(event);
    let json = serde_json::to_string(&msg)?;
    socket.send(Message::Text(json)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EntityKind;
    use serde_json::Value;

    #[test]
    fn test_status_reply_carries_snapshot() {
        let status = BTreeMap::from([("s1".to_string(), 20.5)]);

        let reply: Value = serde_json::from_str(&status_reply(3, Ok(status)).unwrap()).unwrap();

        assert_eq!(reply["type"], "status_reported");
        assert_eq!(reply["buildingId"], 3);
        assert_eq!(reply["status"]["s1"], 20.5);
    }

    #[test]
    fn test_failed_status_request_gets_error_frame() {
        let err = EntityError::Unavailable {
            kind: EntityKind::Building,
            entity_id: "3".to_string(),
            reason: "host is shutting down".to_string(),
        };

        let reply: Value = serde_json::from_str(&status_reply(3, Err(err)).unwrap()).unwrap();

        assert_eq!(reply["type"], "error");
        assert!(reply["error"].as_str().unwrap().contains("status unavailable"));
    }
}

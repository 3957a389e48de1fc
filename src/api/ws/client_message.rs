// src/api/ws/client_message.rs
// Inbound half of the duplex push channel wire protocol.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientMessage {
    SendMessage {
        conversation_id: String,
        content: String,
    },
    StopGeneration {
        conversation_id: String,
    },
}

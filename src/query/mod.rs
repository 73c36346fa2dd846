mod wire;

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{BoardError, Result};
use crate::logging::LogType;
use crate::registry::{ServerRecord, ServerStatus};

use wire::{push_string, push_varint, read_packet, read_string, read_varint, write_packet};

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
// Status responses carry an optional base64 favicon, so allow a couple MiB.
const MAX_RESPONSE_LEN: usize = 2 * 1024 * 1024;
const STATUS_PACKET_ID: i32 = 0x00;
const HANDSHAKE_NEXT_STATE_STATUS: i32 = 1;

/// What a live server reported over the status protocol.
#[derive(Debug, Clone)]
pub struct PingSnapshot {
    pub players_online: u32,
    pub players_max: u32,
    pub version: String,
    pub motd: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    players: Option<PlayersJson>,
    #[serde(default)]
    version: Option<VersionJson>,
    #[serde(default)]
    description: Option<DescriptionJson>,
}

#[derive(Debug, Deserialize)]
struct PlayersJson {
    #[serde(default)]
    online: u32,
    #[serde(default)]
    max: u32,
}

#[derive(Debug, Deserialize)]
struct VersionJson {
    #[serde(default)]
    name: String,
}

// The description is either a bare string or a text component.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DescriptionJson {
    Text(String),
    Component {
        #[serde(default)]
        text: String,
    },
}

impl DescriptionJson {
    fn clean(&self) -> String {
        match self {
            DescriptionJson::Text(text) => text.clone(),
            DescriptionJson::Component { text } => text.clone(),
        }
    }
}

/// Client for the server list ping: a VarInt-framed handshake followed
/// by a status request, answered with a JSON payload.
#[derive(Debug, Clone)]
pub struct StatusQueryClient {
    timeout: Duration,
}

impl StatusQueryClient {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ping `host:port` and return what the server reported. The whole
    /// exchange shares one deadline.
    pub async fn ping(&self, host: &str, port: u16) -> Result<PingSnapshot> {
        debug!(
            log_type = LogType::Query.as_str(),
            "Querying server status at {}:{}", host, port
        );
        tokio::time::timeout(self.timeout, ping_exchange(host, port))
            .await
            .map_err(|_| {
                BoardError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("Status query to {host}:{port} timed out"),
                ))
            })?
    }
}

impl Default for StatusQueryClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn ping_exchange(host: &str, port: u16) -> Result<PingSnapshot> {
    let mut stream = TcpStream::connect((host, port)).await?;

    let mut handshake = Vec::new();
    push_varint(&mut handshake, STATUS_PACKET_ID);
    push_varint(&mut handshake, -1);
    push_string(&mut handshake, host);
    handshake.extend_from_slice(&port.to_be_bytes());
    push_varint(&mut handshake, HANDSHAKE_NEXT_STATE_STATUS);
    write_packet(&mut stream, &handshake).await?;

    write_packet(&mut stream, &[STATUS_PACKET_ID as u8]).await?;

    let body = read_packet(&mut stream, MAX_RESPONSE_LEN).await?;
    let mut cursor = body.as_slice();
    let packet_id = read_varint(&mut cursor).await?;
    if packet_id != STATUS_PACKET_ID {
        return Err(BoardError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unexpected status packet id {packet_id}"),
        )));
    }

    let json = read_string(&mut cursor, MAX_RESPONSE_LEN).await?;
    let response: StatusResponse = serde_json::from_str(&json)?;

    let (players_online, players_max) = response
        .players
        .map(|p| (p.online, p.max))
        .unwrap_or_default();

    Ok(PingSnapshot {
        players_online,
        players_max,
        version: response.version.map(|v| v.name).unwrap_or_default(),
        motd: response
            .description
            .map(|d| d.clean())
            .unwrap_or_default(),
    })
}

/// Result of `query_status`: either live wire data or defaults derived
/// from the record when the server is down or unresponsive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatus {
    pub online: bool,
    pub players_online: u32,
    pub players_max: u32,
    pub version: String,
    pub motd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl QueryStatus {
    pub(crate) fn offline(record: &ServerRecord) -> Self {
        Self {
            online: false,
            players_online: 0,
            players_max: record.max_players,
            version: record.version.clone(),
            motd: record.motd_or_default(),
            status_message: None,
        }
    }

    pub(crate) fn from_ping(ping: PingSnapshot) -> Self {
        Self {
            online: true,
            players_online: ping.players_online,
            players_max: ping.players_max,
            version: ping.version,
            motd: ping.motd,
            status_message: None,
        }
    }

    /// A process is tracked but the query failed: report online with a
    /// degraded marker instead of pretending the server is gone.
    pub(crate) fn not_responding(mut self) -> Self {
        self.online = true;
        self.status_message =
            Some("Server is starting or not responding to queries".to_string());
        self
    }
}

/// Combined per-server stats for the dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub uptime_seconds: u64,
    pub status: ServerStatus,
    pub version: String,
    pub port: u16,
    pub memory: u32,
    pub gamemode: String,
    pub difficulty: String,
    pub max_players: u32,
    pub players_online: u32,
    pub players_max: u32,
    pub online: bool,
    pub motd: String,
}

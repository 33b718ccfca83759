/// Protocol version string advertised by the relay's `/info` endpoint.
pub const PROTOCOL_VERSION: &str = "campana/1";

/// Application name
pub const APP_NAME: &str = "Campana";

/// File-transfer chunk size in bytes (16 KiB). Chosen to stay well under
/// typical data-channel message-size limits; not semantically meaningful.
pub const FILE_CHUNK_SIZE: usize = 16 * 1024;

/// Maximum file transfer size in bytes (50 MiB)
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum accepted SDP payload size in a signal envelope (32 KiB)
pub const MAX_SDP_BYTES: usize = 32 * 1024;

/// Maximum accepted ICE candidate payload size in a signal envelope (4 KiB)
pub const MAX_CANDIDATE_BYTES: usize = 4096;

/// Maximum websocket text frame size accepted by the relay (64 KiB)
pub const MAX_WS_MESSAGE_BYTES: usize = 64 * 1024;

/// Per-connection outbox capacity on the relay; slower consumers drop.
pub const WS_OUTBOX_CAPACITY: usize = 128;

/// Per-connection inbound message budget per minute on the relay.
pub const WS_MAX_MESSAGES_PER_MINUTE: u32 = 600;

/// Default HTTP/WebSocket port for the relay server
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default cap on members of a single call channel. Calls are a relayed
/// peer pair today; the cap leaves headroom for invited participants.
pub const DEFAULT_MAX_CALL_MEMBERS: usize = 8;

//! Canonical structured event names used across `bus-common`.

// Connection and context lifecycle events.
pub const CONNECTION_CREATE: &str = "connection_create";
pub const CONNECTION_REUSE: &str = "connection_reuse";
pub const CONNECTION_START_FAILED: &str = "connection_start_failed";
pub const CONNECTION_RELEASE: &str = "connection_release";
pub const CONNECTION_CLOSE_FAILED: &str = "connection_close_failed";
pub const SESSION_CLOSE_FAILED: &str = "session_close_failed";
pub const CONTEXT_CREATE_FAILED: &str = "context_create_failed";
pub const CONTEXT_CLOSE_OK: &str = "context_close_ok";
pub const CONTEXT_CLOSE_FAILED: &str = "context_close_failed";

// Send/receive events.
pub const SEND_OK: &str = "send_ok";
pub const SEND_FAILED: &str = "send_failed";
pub const SEND_DISCARD_MESSAGE_ID: &str = "send_discard_message_id";
pub const RECEIVE_OK: &str = "receive_ok";
pub const RECEIVE_EMPTY: &str = "receive_empty";
pub const DECODE_UNKNOWN_TYPE: &str = "decode_unknown_type";

// Listener and RPC events.
pub const LISTENER_ATTACH: &str = "listener_attach";
pub const LISTENER_DECODE_FAILED: &str = "listener_decode_failed";
pub const RPC_LISTEN_START: &str = "rpc_listen_start";
pub const RPC_TIMEOUT: &str = "rpc_timeout";
pub const RPC_REPLY_SENT: &str = "rpc_reply_sent";
pub const RPC_REPLY_SKIPPED: &str = "rpc_reply_skipped";
pub const RPC_REPLY_FAILED: &str = "rpc_reply_failed";

// Registration lifecycle events.
pub const REGISTRATION_ADD_OK: &str = "registration_add_ok";
pub const REGISTRATION_ADD_FAILED: &str = "registration_add_failed";
pub const REGISTRATION_CANCEL_OK: &str = "registration_cancel_ok";
pub const REGISTRATION_CANCEL_NOOP: &str = "registration_cancel_noop";
pub const REGISTRATION_TEARDOWN_FAILED: &str = "registration_teardown_failed";
pub const BUS_SHUTDOWN_START: &str = "bus_shutdown_start";
pub const BUS_SHUTDOWN_OK: &str = "bus_shutdown_ok";

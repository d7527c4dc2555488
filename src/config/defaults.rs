//! Default configuration constants.
//!
//! Keeping defaults in one module lets the serde default functions, the
//! `Default` impls, and tests share the same literals.

/// Default listen address for the protocol server.
pub(super) const DEFAULT_BIND: &str = "127.0.0.1:8765";
/// Default JSON-RPC endpoint path.
pub(super) const DEFAULT_ENDPOINT: &str = "/mcp";
/// Interval between SSE keepalive comments.
pub(super) const DEFAULT_KEEPALIVE_SECS: u64 = 15;

/// How long a tool call waits for the execution gate.
pub(super) const DEFAULT_GATE_WAIT_MS: u64 = 2_000;
/// How long a tool call may run on the controller thread.
pub(super) const DEFAULT_PROCESS_TIMEOUT_SECS: u64 = 60;

pub(super) const DEFAULT_MAX_ROUNDS: usize = 12;
pub(super) const DEFAULT_KEEP_RECENT: usize = 6;
pub(super) const DEFAULT_LOOP_REPEAT_LIMIT: usize = 10;
/// History size (characters) above which older turns are compacted.
pub(super) const DEFAULT_COMPACT_THRESHOLD_CHARS: usize = 48_000;

/// Default OpenAI-compatible API base URL.
pub(super) const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
pub(super) const DEFAULT_MODEL_ID: &str = "gpt-4o-mini";
/// Default timeout for model API requests.
pub(super) const DEFAULT_API_TIMEOUT_SECS: u64 = 120;

/// Config file name searched in the working directory and config root.
pub(super) const CONFIG_FILE_NAME: &str = "docbridge.toml";

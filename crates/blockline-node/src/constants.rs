pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;
pub const DEFAULT_LOG_FILTER: &str = "info";
/// Highest nonce-search difficulty the node accepts on the command line.
pub const MAX_LOCAL_DIFFICULTY: u32 = 32;
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
pub const PROMPT_CHANNEL_CAPACITY: usize = 16;
pub(crate) const ACCEPT_BACKOFF_MS: u64 = 100;

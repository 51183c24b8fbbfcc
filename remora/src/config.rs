use std::time::Duration;

use crate::model::Role;

/// Default TCP port of the control channel.
pub const DEFAULT_PORT: u16 = 11732;

/// Runtime configuration shared by the endpoint and the mirroring components.
///
/// Use the builder methods to customize, or [`Default`] for sensible defaults.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use remora::Config;
///
/// let config = Config::default()
///     .with_max_batch_rows(128)                        // Larger content pages
///     .with_frame_debounce(Duration::from_millis(5));  // Coalesce frame bursts
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of the channel between the stream reader and the dispatch task.
    /// Default: 128
    pub channel_size: usize,

    /// Largest accepted frame payload in bytes. Bigger frames are a
    /// protocol violation and close the connection.
    /// Default: 16 MiB
    pub max_payload_size: usize,

    /// TCP port of the control channel. The auxiliary channel uses `port + 1`.
    /// Default: 11732
    pub port: u16,

    /// Upper bound on the number of rows a single content request covers.
    /// Default: 64
    pub max_batch_rows: usize,

    /// Coalescing window between a source change and the next frame grab.
    /// `Duration::ZERO` waits a single scheduling tick.
    /// Default: zero
    pub frame_debounce: Duration,

    /// Messages addressed to objects the peer has not announced yet are kept
    /// until the announcement arrives. Beyond this many, new ones are dropped.
    /// Default: 1024
    pub max_pending_messages: usize,

    /// Roles a mirrored collection fetches for every cell.
    /// Default: display, decoration, tool tip and check state.
    pub default_roles: Vec<Role>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            channel_size: 128,
            max_payload_size: 16 * 1024 * 1024,
            port: DEFAULT_PORT,
            max_batch_rows: 64,
            frame_debounce: Duration::ZERO,
            max_pending_messages: 1024,
            default_roles: vec![
                Role::Display,
                Role::Decoration,
                Role::ToolTip,
                Role::CheckState,
            ],
        }
    }
}

impl Config {
    /// Set the buffer size between the stream reader and the dispatcher.
    pub fn with_channel_size(mut self, size: usize) -> Self {
        self.channel_size = size;
        self
    }

    /// Set the largest accepted frame payload.
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Set the control channel port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set how many rows one content request may cover.
    ///
    /// Lower values give faster first paint on huge collections, higher values
    /// fewer round trips when scrolling. Values below 1 are treated as 1.
    pub fn with_max_batch_rows(mut self, rows: usize) -> Self {
        self.max_batch_rows = rows.max(1);
        self
    }

    /// Set the frame coalescing window.
    pub fn with_frame_debounce(mut self, debounce: Duration) -> Self {
        self.frame_debounce = debounce;
        self
    }

    /// Set how many messages may wait for a peer announcement.
    pub fn with_max_pending_messages(mut self, limit: usize) -> Self {
        self.max_pending_messages = limit;
        self
    }

    /// Set the roles fetched for every mirrored cell.
    pub fn with_default_roles(mut self, roles: impl Into<Vec<Role>>) -> Self {
        self.default_roles = roles.into();
        self
    }

    /// Port of the auxiliary channel.
    pub fn auxiliary_port(&self) -> u16 {
        self.port.wrapping_add(1)
    }
}

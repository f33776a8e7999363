//! Client configuration constants.
//!
//! Centralizes hardcoded values. User-tunable values have a default here and
//! a field in [`WidgetConfig`](crate::config::WidgetConfig).

use std::time::Duration;

/// Default base URL when none is configured.
pub const DEFAULT_URL: &str = "http://localhost";

/// Persistence key namespace.
pub const DEFAULT_NAMESPACE: &str = "weavy";

/// Maximum number of bubbles kept in the dock.
pub const DEFAULT_BUBBLE_LIMIT: usize = 16;

/// Delay before each typed (feature) frame is preloaded.
pub const DEFAULT_PRELOAD_DELAY: Duration = Duration::from_millis(1500);

/// A frame that has not loaded after this long no longer blocks the
/// preload sequence.
pub const DEFAULT_PRELOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Length of the panel close transition.
pub const DEFAULT_CLOSE_TRANSITION: Duration = Duration::from_millis(200);

/// Leader lease renewal interval.
pub const DEFAULT_LEADER_HEARTBEAT: Duration = Duration::from_secs(1);

/// A lease not renewed within this window is up for grabs.
pub const DEFAULT_LEADER_LEASE: Duration = Duration::from_secs(3);

/// Server path for bubble listing and removal.
pub const DEFAULT_BUBBLES_ENDPOINT: &str = "/api/bubbles";

/// Buffered outward events per subscriber before lagging.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Buffered frame messages per frame before lagging.
pub const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Buffered realtime events per subscriber.
pub const REALTIME_CHANNEL_CAPACITY: usize = 128;

/// Panel type tag used for bubble panels.
pub const BUBBLE_PANEL_KIND: &str = "bubble";

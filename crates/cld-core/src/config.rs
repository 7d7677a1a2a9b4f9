//! Session configuration knobs.

use std::time::Duration;

use cld_proto::MAX_MSG_SIZE;

/// How long between retransmission sweeps.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// How long an outbound message waits for its response before it is
/// completed with a timeout.
pub const DEFAULT_MESSAGE_EXPIRY: Duration = Duration::from_secs(5 * 60);

/// How long a session survives without any inbound packet.
pub const DEFAULT_SESSION_EXPIRY: Duration = Duration::from_secs(2 * 60);

/// How often the outbound queue is scanned for expired messages.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// How many prior inbound sequence IDs are remembered for re-ACKing.
pub const DEFAULT_REMEMBERED_WINDOW: u64 = 25;

/// What to do when the server reports it is no longer the master.
///
/// Either way the engine emits [`crate::SessionEvent::NotMaster`]
/// first, so a driver can rotate its host ring and open a replacement
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotMasterPolicy {
    /// Fail the session: complete every in-flight RPC with a timeout and
    /// emit `SessFailed`. The caller reconnects to another host.
    #[default]
    FailSession,
    /// Log and drop the message; in-flight RPCs keep retrying against
    /// the same server until they expire.
    Ignore,
}

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between retransmission sweeps of unacked fragments.
    pub retry_interval: Duration,
    /// Lifetime of an outbound message awaiting its response.
    pub message_expiry: Duration,
    /// Session deadline, refreshed by every inbound packet.
    pub session_expiry: Duration,
    /// Interval between expired-message scans of the outbound queue.
    pub scan_interval: Duration,
    /// Width of the inbound duplicate-tolerance window.
    pub remembered_window: u64,
    /// Reassembly buffer bound; longer inbound messages are dropped.
    pub max_message_size: usize,
    /// Reaction to a NOT-MASTER message from the server.
    pub not_master_policy: NotMasterPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            message_expiry: DEFAULT_MESSAGE_EXPIRY,
            session_expiry: DEFAULT_SESSION_EXPIRY,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            remembered_window: DEFAULT_REMEMBERED_WINDOW,
            max_message_size: MAX_MSG_SIZE,
            not_master_policy: NotMasterPolicy::default(),
        }
    }
}

/// Authentication identity for a session.
///
/// The secret key signs every outbound packet and verifies every inbound
/// one; it never crosses the wire.
#[derive(Clone)]
pub struct Credentials {
    /// User name, 1 to 31 bytes.
    pub user: String,
    /// Shared secret for the packet HMAC.
    pub secret: Vec<u8>,
}

impl Credentials {
    /// Build credentials from a user name and secret.
    pub fn new(user: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self { user: user.into(), secret: secret.into() }
    }
}

// Manual Debug so the secret cannot leak into logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("user", &self.user).finish_non_exhaustive()
    }
}

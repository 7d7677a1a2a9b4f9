//! Coordination-server host ring.
//!
//! Discovery itself (SRV lookup or static configuration) is the
//! caller's business; this module consumes whatever records discovery
//! produced, orders them the way SRV consumers do (priority ascending,
//! weight descending within a priority), keeps at most
//! [`HostRing::CAPACITY`] of them, and tracks which one the client is
//! currently bound to. Rotation happens on session failure.

use crate::error::EngineError;

/// One discovered coordination server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    /// Host name or address literal.
    pub host: String,
    /// UDP/TCP port.
    pub port: u16,
    /// SRV priority; lower is preferred.
    pub priority: u16,
    /// SRV weight; higher is preferred within a priority.
    pub weight: u16,
}

impl HostRecord {
    /// A record with neutral priority and weight, for explicit
    /// `(host, port)` configuration.
    pub fn explicit(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, priority: 0, weight: 0 }
    }
}

/// Fixed-capacity rotation ring over discovered hosts.
#[derive(Debug, Clone)]
pub struct HostRing {
    hosts: Vec<HostRecord>,
    active: usize,
}

impl HostRing {
    /// Upper bound on retained hosts.
    pub const CAPACITY: usize = 10;

    /// Build a ring from discovery output.
    ///
    /// Records are sorted by `(priority, -weight)` and truncated to
    /// [`Self::CAPACITY`].
    ///
    /// # Errors
    ///
    /// - `EngineError::NoHosts` if `records` is empty
    pub fn new(records: impl IntoIterator<Item = HostRecord>) -> Result<Self, EngineError> {
        let mut hosts: Vec<_> = records.into_iter().collect();
        if hosts.is_empty() {
            return Err(EngineError::NoHosts);
        }
        hosts.sort_by(|a, b| {
            a.priority.cmp(&b.priority).then_with(|| b.weight.cmp(&a.weight))
        });
        hosts.truncate(Self::CAPACITY);
        Ok(Self { hosts, active: 0 })
    }

    /// A single-host ring for explicit configuration.
    pub fn single(host: impl Into<String>, port: u16) -> Self {
        Self { hosts: vec![HostRecord::explicit(host, port)], active: 0 }
    }

    /// The host the client should currently use.
    #[must_use]
    pub fn active(&self) -> &HostRecord {
        &self.hosts[self.active]
    }

    /// Rotate to the next host after a session failure.
    pub fn advance(&mut self) -> &HostRecord {
        self.active = (self.active + 1) % self.hosts.len();
        &self.hosts[self.active]
    }

    /// Number of retained hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Always false; construction rejects empty rings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(host: &str, priority: u16, weight: u16) -> HostRecord {
        HostRecord { host: host.into(), port: 8081, priority, weight }
    }

    #[test]
    fn srv_ordering() {
        let ring = HostRing::new(vec![
            rec("low-weight", 1, 10),
            rec("backup", 2, 100),
            rec("primary", 1, 50),
        ])
        .unwrap();

        assert_eq!(ring.active().host, "primary");
        let order: Vec<_> = {
            let mut r = ring.clone();
            (0..r.len()).map(|_| r.advance().host.clone()).collect()
        };
        assert_eq!(order, vec!["low-weight", "backup", "primary"]);
    }

    #[test]
    fn rotation_wraps() {
        let mut ring = HostRing::new(vec![rec("a", 0, 0), rec("b", 0, 0)]).unwrap();
        assert_eq!(ring.active().host, "a");
        assert_eq!(ring.advance().host, "b");
        assert_eq!(ring.advance().host, "a");
    }

    #[test]
    fn capacity_bound() {
        let ring =
            HostRing::new((0..20).map(|i| rec(&format!("h{i}"), i, 0))).unwrap();
        assert_eq!(ring.len(), HostRing::CAPACITY);
    }

    #[test]
    fn empty_discovery_is_an_error() {
        assert_eq!(HostRing::new(Vec::new()).unwrap_err(), EngineError::NoHosts);
    }

    #[test]
    fn single_host() {
        let ring = HostRing::single("127.0.0.1", 8081);
        assert_eq!(ring.active().port, 8081);
        assert_eq!(ring.len(), 1);
    }
}

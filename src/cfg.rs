use std::time::Duration;

/// Tuning knobs for the protocol engine.
///
/// The defaults match the classic protocol constants; tests shrink
/// `retransmit_timeout` to drive retransmission scenarios quickly.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of unacknowledged DATA packets in flight per peer.
    pub window: usize,
    /// Retransmissions allowed per packet before the peer is declared dead.
    pub max_retries: usize,
    /// Delay before an unacknowledged packet is retransmitted. Applies
    /// uniformly to SYN, DATA and FIN.
    pub retransmit_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            window: 3,
            max_retries: 5,
            retransmit_timeout: Duration::from_millis(2000),
        }
    }
}

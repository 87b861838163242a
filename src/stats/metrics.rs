//! Connection statistics for restreams and endpoints

use serde::Serialize;

/// Byte counters and throughput estimate for one connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnStats {
    /// Total bytes sent
    pub tx_bytes: u64,
    /// Total bytes received
    pub rx_bytes: u64,
    /// Current bitrate estimate (kbit/s)
    pub bitrate: f64,
}

impl ConnStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count bytes sent
    pub fn add_tx(&mut self, bytes: usize) {
        self.tx_bytes = self.tx_bytes.saturating_add(bytes as u64);
    }

    /// Count bytes received
    pub fn add_rx(&mut self, bytes: usize) {
        self.rx_bytes = self.rx_bytes.saturating_add(bytes as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conn_stats_new() {
        let stats = ConnStats::new();
        assert_eq!(stats.tx_bytes, 0);
        assert_eq!(stats.rx_bytes, 0);
        assert_eq!(stats.bitrate, 0.0);
    }

    #[test]
    fn test_conn_stats_counters() {
        let mut stats = ConnStats::new();
        stats.add_rx(1000);
        stats.add_rx(500);
        stats.add_tx(200);

        assert_eq!(stats.rx_bytes, 1500);
        assert_eq!(stats.tx_bytes, 200);
    }

    #[test]
    fn test_conn_stats_serialization() {
        let stats = ConnStats {
            tx_bytes: 1,
            rx_bytes: 2,
            bitrate: 3.5,
        };
        let json = serde_json::to_value(stats).unwrap();

        assert_eq!(json["txBytes"], 1);
        assert_eq!(json["rxBytes"], 2);
        assert_eq!(json["bitrate"], 3.5);
    }
}

// 8.0: chain-wide parameters. per-asset knobs live in BitassetOptions; these
// apply to every synthetic the engine hosts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainParams {
    /// Maintenance runs (settlement queue, bid processing, feed expiry
    /// sweep) happen once per this many seconds.
    pub maintenance_interval_secs: i64,
    /// Forced settlement requests below this many shares are rejected.
    pub min_force_settle_amount: i64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            maintenance_interval_secs: 3600,
            min_force_settle_amount: 1,
        }
    }
}

//! Download statistics tracking

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Number of entries kept in the recent-downloads window
pub const RECENT_CAPACITY: usize = 10;

/// Cumulative download statistics plus a bounded recent-activity window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Completed downloads over the process lifetime
    pub total_downloads: u64,

    /// Bytes served over the process lifetime, including evicted records
    pub total_bytes_served: u64,

    /// Most recent downloads, oldest first
    pub recent: VecDeque<DownloadRecord>,
}

/// One completed download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Relative path as requested
    pub file: String,

    /// Bytes served
    pub bytes: u64,

    /// Client address
    pub client: String,

    /// Transfer duration in seconds, two decimal places
    pub time: f64,
}

impl Stats {
    /// Account for one completed download.
    ///
    /// Updates both cumulative counters and the recent window as a single
    /// step; callers hold the write lock for the duration.
    pub fn record(&mut self, file: String, bytes: u64, client: String, elapsed: Duration) {
        self.total_downloads += 1;
        self.total_bytes_served += bytes;
        if self.recent.len() == RECENT_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(DownloadRecord {
            file,
            bytes,
            client,
            time: round_secs(elapsed),
        });
    }

    /// Point-in-time copy of all fields
    pub fn snapshot(&self) -> Stats {
        self.clone()
    }
}

fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

use std::sync::LazyLock;

use prometheus::{IntGaugeVec, register_int_gauge_vec};
use sqlx::MySqlPool;

/// Connection counts of the most recently sampled pool, labelled by `state`
pub static MYSQL_CONNECTIONS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "mysql_connections",
        "How many MySQL connections and what status they're in.",
        &["state"]
    )
    .expect("register mysql_connections")
});

/// Point-in-time pool occupancy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections waiting in the pool
    pub idle: u32,
    /// Connections checked out
    pub in_use: u32,
    /// All connections the pool holds, idle or not
    pub open: u32,
}

impl PoolStats {
    /// Samples a pool
    #[must_use]
    pub fn of(pool: &MySqlPool) -> Self {
        let open = pool.size();
        let idle = u32::try_from(pool.num_idle()).unwrap_or(open).min(open);
        Self {
            idle,
            in_use: open - idle,
            open,
        }
    }

    pub(crate) fn publish(self, gauges: &IntGaugeVec) {
        gauges.with_label_values(&["idle"]).set(self.idle.into());
        gauges.with_label_values(&["inuse"]).set(self.in_use.into());
        gauges.with_label_values(&["open"]).set(self.open.into());
    }
}

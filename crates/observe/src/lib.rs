//! Observability surface of the control plane: rolling-window statistics
//! over numeric updates, the process-global bounded log cache, and the
//! traffic accounting behind the broker rate monitor.

mod logcache;
mod rates;
mod stats;

pub use logcache::{CacheLayer, LogCache, LogRecord, DEFAULT_CAPACITY};
pub use rates::{classify, RateAccounting, LOG_SENDER, UNROUTED_RECEIVER};
pub use stats::{RollingWindowStatistics, StatisticsRegistry, DEFAULT_WINDOW};

//! Read-side data fetching: request coalescing, a TTL result cache and the
//! coordinator that ties them to registered fetchers.

mod cache;
mod coalescer;
mod coordinator;
mod events;
mod metrics;
mod resource;

pub use cache::{Lookup, ResultCache};
pub use coalescer::{RequestCoalescer, DEFAULT_MAX_COALESCED};
pub use coordinator::{FetchRequest, Fetcher, FetcherCoordinator, FetcherDefinition};
pub use events::{EventBus, FetchEvent};
pub use metrics::{FetcherHealth, FetcherMetrics, MetricsSnapshot};
pub use resource::Resource;

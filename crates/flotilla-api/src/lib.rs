//! flotilla-api — the client-facing query/command surface.
//!
//! Operators talk to flotilla over correlated pub/sub channels, one
//! channel per operation. `responders` answers those channels against
//! the fleet, scaler, and stats components; `gateway` bridges external
//! clients (WebSocket) and event producers (HTTP) onto the bus.
//!
//! # Operation channels
//!
//! | Channel | Params | Data |
//! |---|---|---|
//! | `getAllInstances` | — | `[ServiceInstance]` |
//! | `getAllInstancesTypes` | — | `[type]` |
//! | `getAllInstancesByType` | `type` | `[ServiceInstance]` |
//! | `getTotalInstancesByType` | `type` | count |
//! | `setTotalInstancesByType` | `type`, `newTotal` | status message |
//! | `getResponseStatsFromTimestamp` | `timestamp` | `RangeStats` |
//! | `getServiceTypeResponseStatsFromTimestamp` | `serviceType`, `timestamp` | `RangeStats` |
//! | `getSegregatedResponseStatsFromTimestamp` | `timestamp` | second → `StatBucket` |
//! | `getServiceTypeSegregatedResponseStatsFromTimestamp` | `serviceType`, `timestamp` | second → `StatBucket` |

pub mod gateway;
pub mod responders;

pub use gateway::{GatewayState, build_router};
pub use responders::{ApiContext, spawn_event_ingest, spawn_responders};

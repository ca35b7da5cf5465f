//! hostlink driver library
//!
//! Lets a compute orchestrator drive a remote virtualization host through a
//! session-oriented, fault-prone management API. The VM operations are thin;
//! the work is in the substrate beneath them.
//!
//! ## Architecture
//!
//! ```text
//! HostDriver            (VM lifecycle facade)
//! ├── TaskPoller        (remote task -> awaitable result)
//! │   └── Invoker
//! └── Invoker           (classification-driven retry)
//!     ├── fault::classify
//!     └── Session       (login, re-authentication, logout)
//!         └── Connector / Transport (wire client)
//! ```
//!
//! ## Modules
//!
//! - `fault`: maps transport errors onto retry remedies
//! - `session`: shared authenticated channel
//! - `invoker`: retrying method dispatch
//! - `task`: remote task polling
//! - `driver`: operations consumed by the orchestrator
//! - `transport`: wire seam and the HTTP implementation

pub mod config;
pub mod driver;
pub mod error;
pub mod fault;
pub mod invoker;
pub mod remote;
pub mod session;
pub mod task;
pub mod transport;

// Re-export commonly used types
pub use config::DriverConfig;
pub use driver::{
    HostDriver, InstanceInfo, InstanceSpec, VifSpec, VolumeConnection, VolumeConnector,
};
pub use error::DriverError;
pub use fault::{classify, FaultKind, FaultSignature};
pub use invoker::{Invoker, InvokerConfig};
pub use session::Session;
pub use task::{TaskHandle, TaskOutcome, TaskPoller};
pub use transport::{Connector, SessionKey, Transport, TransportError};

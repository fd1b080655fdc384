//! labelgrid-gateway — synchronous front for an asynchronous pipeline.
//!
//! A caller submits a payload and blocks until a worker somewhere has
//! classified it. The pieces:
//!
//! - [`WaitRegistry`] maps task ids to one-shot completion signals and
//!   holds results nobody is waiting for until they age out.
//! - [`RequestGateway`] registers a wait handle, stores the payload,
//!   enqueues the task and waits with a deadline.
//! - [`ResultCorrelator`] drains the result queue into the registry.

pub mod correlator;
pub mod error;
pub mod gateway;
pub mod registry;

pub use correlator::ResultCorrelator;
pub use error::{GatewayError, GatewayResult};
pub use gateway::RequestGateway;
pub use registry::{Resolution, WaitHandle, WaitRegistry};

//! Capability abstraction for braid.
//!
//! A capability is anything that accepts structured input and returns
//! content along with the tokens and money it spent: an agent, an embedder,
//! or a moderator. Workflows only ever talk to capabilities through the
//! [`Capability`] trait.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Capability trait                       │
//! │  - invoke(input) -> Completion          │
//! │  - classify(input, routes) -> label     │
//! └─────────────────────────────────────────┘
//!                    │
//!     ┌──────────────┼──────────────┐
//!     ▼              ▼              ▼
//! ┌────────┐   ┌──────────┐   ┌───────────┐
//! │ Agent  │   │ Embedder │   │ Moderator │
//! └────────┘   └──────────┘   └───────────┘
//! ```
//!
//! Cancellation is cooperative: every call receives a
//! [`CancellationToken`](tokio_util::sync::CancellationToken) and is expected
//! to observe it at its own checkpoints (see [`checkpoint`]).

pub mod capability;
pub mod error;
pub mod function;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use capability::{
    Capability, CapabilityKind, Classification, Completion, RouteDescription, SharedCapability,
    checkpoint,
};
pub use error::{CapabilityError, Result};
pub use function::{FnCapability, InvokeFn};

#[cfg(any(test, feature = "testing"))]
pub use mock::MockCapability;

pub use tokio_util::sync::CancellationToken;

//! Circuit breaker state machine:
//!
//! ```text
//!               trigger condition met
//!
//!     +----------------------------------------------------------------+
//!     |                                                                |
//!     |                                                                v
//! +----------------+                +----------------+  sleep window  +----------------+
//! |                |  consecutive   |                |<---------------|                |
//! |     Closed     |   successes    |    HalfOpen    |                |      Open      |
//! |                |<---------------|                |  probe failed  |                |
//! |                |                |                +--------------->|                |
//! +----------------+                +----------------+                +----------------+
//! ```
//!
//! Each resource under a rule gets a [`ResourceBreaker`]: trigger counters
//! (one per trigger condition) aggregate success/failure samples while the
//! breaker is Closed; when a threshold is crossed the counter fires
//! `close_to_open` and the machine installs an Open status. After the rule's
//! sleep window a scheduled task moves the machine to Half-Open, where a
//! bounded number of probe requests is admitted; a contiguous run of
//! successes closes the breaker again, any failure reopens it.
//!
//! The [`BreakerRegistry`] maps resources to breakers, routes
//! [`crate::base::ResourceStat`] reports and answers admission checks.

pub mod breaker;
pub mod counter;
pub mod registry;
pub mod rule;
pub mod window;

pub use breaker::*;
pub use counter::*;
pub use registry::*;
pub use rule::*;
pub use window::*;

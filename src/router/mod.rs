//! Router (§4.2): direct/fanout/topic/headers exchange routing and
//! route-rule resolution for task dispatch.

pub mod topic;

mod engine;
mod headers;

pub use engine::{RouteError, Router};
pub use headers::headers_match;
pub use topic::{glob_matches, topic_matches};

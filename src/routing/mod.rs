//! Inbound command routing

pub mod topic_router;

pub use topic_router::{RouteHandler, RouteOutcome, TopicRouter};

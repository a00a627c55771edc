//! Backend identities and executable discovery for the agent API.

pub mod agents;
pub mod locator;

//! Ports: the seams between the receiver and the outside world.

pub mod inbound;
pub mod outbound;

//! Domain layer: pure catchain types and algorithms.

mod config;
mod dag;
mod entities;
mod errors;
mod neighbours;
mod production;
mod source;
mod sync;
mod timers;
mod validation;

pub use config::*;
pub use dag::*;
pub use entities::*;
pub use errors::*;
pub use neighbours::*;
pub use production::*;
pub use source::*;
pub use sync::*;
pub use timers::*;
pub use validation::*;

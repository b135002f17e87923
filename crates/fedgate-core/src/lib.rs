//! Fedgate Core - Domain types and traits for the identity federation broker

pub mod conditions;
pub mod error;
pub mod ids;
pub mod resources;
pub mod traits;
pub mod transform;

pub use conditions::*;
pub use error::*;
pub use ids::*;
pub use resources::*;
pub use traits::*;
pub use transform::*;

pub mod events;
pub mod handler;
pub mod normalize;
pub mod signature;

pub use normalize::{EventNormalizer, Routing};

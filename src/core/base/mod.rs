pub mod resource;
pub mod rule;

pub use resource::*;
pub use rule::*;

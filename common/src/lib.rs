mod constants;
mod model;
mod viewport;

pub use constants::*;
pub use model::*;
pub use viewport::*;

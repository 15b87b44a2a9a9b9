pub mod history;
pub mod session;
pub mod stats;

pub use history::*;
pub use session::*;
pub use stats::compute;

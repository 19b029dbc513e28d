pub mod invocation;
pub mod output;
pub mod terminal;

pub use invocation::*;
pub use output::*;
pub use terminal::*;

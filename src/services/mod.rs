pub mod output_reader;
pub mod persistent_session;
pub mod session_controller;
pub mod transient_session;

pub use output_reader::{OutputReader, ReadStrategy};
pub use persistent_session::PersistentSession;
pub use session_controller::{Debouncer, SessionController};
pub use transient_session::TransientSession;

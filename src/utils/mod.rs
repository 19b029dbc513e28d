pub mod decoder;
pub mod interpreter;
pub mod process_killer;
pub mod prompt_filter;
pub mod shell;

#[cfg(not(target_os = "windows"))]
pub mod user_path;

pub use decoder::{decode, StreamDecoder};
pub use process_killer::*;
pub use prompt_filter::PromptFilter;
pub use shell::ShellProfile;

#[cfg(not(target_os = "windows"))]
pub use user_path::*;

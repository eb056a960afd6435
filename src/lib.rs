pub mod library;
pub mod panic_handler;
pub mod pdf;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use pdf::{Navigation, ReaderEvent, ReaderSession};
pub use settings::Settings;

//! `CourierTransport` adapters.

mod file_drop;
mod log;
mod recording;
mod unavailable;

pub use file_drop::{FileDropTransport, Manifest};
pub use log::LogTransport;
pub use recording::RecordingTransport;
pub use unavailable::UnavailableTransport;

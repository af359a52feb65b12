//! Impulse response library for IRMix - loading, browsing, and sessions

mod browse;
mod loader;
mod resample;
mod session;

pub use browse::{is_impulse_file, list_impulse_files, sibling_impulse, IR_EXTENSIONS};
pub use loader::{ImpulseLoader, ImpulseResponse, LoadError, MAX_IR_CHANNELS};
pub use resample::{resample_channels, ResampleError};
pub use session::{SessionState, SlotSession, SESSION_SLOTS};

mod recorder;

pub use recorder::{Label, SessionRecorder};

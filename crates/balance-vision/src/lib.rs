mod backend;
mod edges;
mod ellipse;
mod frame_source;
mod inference_worker;
mod ipc;
mod learned;
mod normalize;
mod process;
mod region_tracker;

pub use backend::{ClassicalBackend, DetectorBackend};
pub use ellipse::{fit_ellipse, Ellipse};
pub use frame_source::{CommandFrameSource, DirectoryFrameSource};
pub use inference_worker::{InferenceWorker, WorkerEvent, WorkerMsg};
pub use learned::{select_largest, BallModel, Candidate, LearnedBackend};
pub use normalize::FrameNormalizer;
pub use region_tracker::{RegionTracker, TrackerState};

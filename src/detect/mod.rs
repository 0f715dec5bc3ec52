mod backend;
mod backends;
mod centroid;
mod registry;
mod result;

pub use backend::TrackerBackend;
pub use backends::StubTracker;
pub use centroid::CentroidTracker;
pub use registry::{BackendConstructor, TrackerRegistry};
pub use result::{BoundingBox, Detection, LocalTrack, ObjectClass};

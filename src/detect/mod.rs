mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{BackgroundBackend, StubBackend};
pub use registry::{BackendRegistry, DetectorFactory};
pub use result::Detection;

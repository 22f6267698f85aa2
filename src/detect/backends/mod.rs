pub mod background;
pub mod stub;

pub use background::BackgroundBackend;
pub use stub::StubBackend;

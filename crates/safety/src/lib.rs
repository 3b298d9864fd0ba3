pub mod gate;
pub mod illegal;

pub use gate::{BlockEntry, HostGate};
pub use illegal::{IllegalContentDetector, IllegalDetection};

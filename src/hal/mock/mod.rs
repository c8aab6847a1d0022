pub mod backend;

pub use backend::{MockBackend, MockDeviceConfig};

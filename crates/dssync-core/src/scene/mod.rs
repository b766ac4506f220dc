pub(crate) mod activation;
pub mod echo;
pub mod manager;
pub mod throttle;

pub use activation::SceneCall;
pub use echo::{EchoAction, EchoLedger, EchoTarget};
pub use manager::SceneManager;
pub use throttle::SceneThrottle;

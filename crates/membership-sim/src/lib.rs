//! membership-sim - drives a simulated group over a lossy network and
//! reports how quickly crashed members are detected.

pub mod config;
pub mod scenario;

pub use config::Config;
pub use scenario::Report;

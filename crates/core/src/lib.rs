pub mod activity;
pub mod config;
pub mod error;
pub mod key;
pub mod resource;
pub mod schedule;
pub mod settings;
pub mod window;

pub use activity::*;
pub use config::Config;
pub use error::*;
pub use key::{CombinationKey, DomainAxis};
pub use resource::*;
pub use schedule::*;
pub use settings::*;
pub use window::TimeWindow;

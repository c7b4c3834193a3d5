mod loader;
mod types;

pub use loader::{ConfigLayer, ConfigLoader};

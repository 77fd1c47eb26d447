pub mod scheduler;

pub use scheduler::{AttestConfig, SlashScheduler};

pub mod events;
pub mod terrain;

// Re-export all event types for easier access
pub use events::*;

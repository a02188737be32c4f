use uuid::Uuid;

pub mod subscriber;
pub mod target;

// Re-exports for convenience
pub use subscriber::*;
pub use target::*;

// Helper function to generate ids for targets created without one
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

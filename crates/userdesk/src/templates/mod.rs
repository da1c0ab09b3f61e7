//! Server-side views.

mod engine;

pub use engine::Views;

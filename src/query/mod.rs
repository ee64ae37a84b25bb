// Read-side lookups over stored repository graphs

pub mod engine;

pub use engine::QueryEngine;

pub mod api;
pub mod completions;
pub mod provider;
pub mod shape;
pub mod validate;

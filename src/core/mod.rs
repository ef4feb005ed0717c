pub mod config;
pub mod context;
pub mod filters;
pub mod markov;
pub mod model;
pub mod pipeline;
pub mod reveal;
pub mod sampler;
pub mod text;

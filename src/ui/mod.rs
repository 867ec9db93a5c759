pub mod markdown;
pub mod renderer;

pub mod adventure;
pub mod sampling;

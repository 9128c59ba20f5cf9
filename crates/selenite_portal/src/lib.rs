pub mod camera;
pub mod config;
pub mod portal;
pub mod render;
pub mod traveller;

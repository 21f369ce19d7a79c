mod routes;
mod server;

pub mod app;
pub mod camera;
pub mod config;
pub mod entity;
pub mod facebox;
pub mod platform;
pub mod poller;
pub mod telemetry;

pub use app::start_app;
pub use entity::{FaceEvent, FaceProcessor, ImageProcessingEntity};
pub use facebox::{Detection, Facebox, FaceboxError, FaceboxSettings};

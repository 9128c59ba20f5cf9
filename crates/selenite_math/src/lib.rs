pub mod frame;
pub mod frustum;
pub mod plane;
pub mod projection;

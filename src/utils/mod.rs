pub mod logging;
pub mod math;

pub use math::AxisBox;

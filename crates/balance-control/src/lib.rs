mod dual_axis;
mod pid;
mod position_filter;

pub use dual_axis::{DualAxisController, Voltages};
pub use pid::PID;
pub use position_filter::PositionFilter;

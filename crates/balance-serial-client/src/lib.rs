mod dac;
mod dry_run;
mod serial_client;

pub use dac::*;
pub use dry_run::DryRunActuator;
pub use serial_client::*;

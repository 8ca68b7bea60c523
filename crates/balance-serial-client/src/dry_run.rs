use anyhow::Result;
use balance_core::ActuatorSink;

/// Actuator sink used when no hardware is attached. Logs every write and
/// remembers the last one.
#[derive(Debug, Default)]
pub struct DryRunActuator {
    last: Option<(f64, f64)>,
    writes: usize,
}

impl DryRunActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<(f64, f64)> {
        self.last
    }

    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl ActuatorSink for DryRunActuator {
    fn set(&mut self, channel_a: f64, channel_b: f64) -> Result<()> {
        tracing::debug!(
            "Dry run: VCh1 = {:.2} V, VCh2 = {:.2} V",
            channel_a,
            channel_b
        );
        self.last = Some((channel_a, channel_b));
        self.writes += 1;
        Ok(())
    }
}

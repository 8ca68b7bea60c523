/// Full scale code of a 12-bit DAC channel.
pub const DAC_MAX_CODE: u16 = 4095;

/// Voltage to code conversion for an MCP4728 channel running off an external
/// reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mcp4728 {
    vref: f64,
}

impl Mcp4728 {
    pub fn new(vref: f64) -> Self {
        Self { vref }
    }

    pub fn vref(&self) -> f64 {
        self.vref
    }

    /// The code that makes the channel output `voltage`, saturating at the
    /// ends of the range.
    pub fn code(&self, voltage: f64) -> u16 {
        if !voltage.is_finite() || self.vref <= 0.0 {
            return 0;
        }
        let code = (voltage / self.vref * DAC_MAX_CODE as f64).round();
        code.clamp(0.0, DAC_MAX_CODE as f64) as u16
    }

    /// The voltage a channel outputs for `code`.
    pub fn voltage(&self, code: u16) -> f64 {
        code.min(DAC_MAX_CODE) as f64 / DAC_MAX_CODE as f64 * self.vref
    }
}

impl Default for Mcp4728 {
    fn default() -> Self {
        Self::new(5.1)
    }
}

/// Bridge command that sets both channels and latches them together.
pub fn format_command(code_a: u16, code_b: u16) -> String {
    format!("a{};b{};W;\n", code_a, code_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_code_conversion() {
        let dac = Mcp4728::default();
        assert_eq!(dac.code(0.0), 0);
        assert_eq!(dac.code(5.1), 4095);
        assert_eq!(dac.code(2.5), 2007);
        assert_eq!(dac.code(5.0), 4015);
    }

    #[test]
    fn test_code_saturates() {
        let dac = Mcp4728::default();
        assert_eq!(dac.code(-1.0), 0);
        assert_eq!(dac.code(7.0), 4095);
        assert_eq!(dac.code(f64::NAN), 0);
    }

    #[test]
    fn test_voltage_of_code() {
        let dac = Mcp4728::new(4.095);
        assert_relative_eq!(dac.voltage(1000), 1.0);
        assert_relative_eq!(dac.voltage(u16::MAX), 4.095);
    }

    #[test]
    fn test_format_command() {
        assert_eq!(format_command(2007, 0), "a2007;b0;W;\n");
    }
}

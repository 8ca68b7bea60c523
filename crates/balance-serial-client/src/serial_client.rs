use std::{
    io::Write,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use balance_core::{ActuatorSettings, ActuatorSink};
use serialport::available_ports;

use crate::dac::{format_command, Mcp4728};

const TIMEOUT: Duration = Duration::from_millis(20);

/// List available serial ports. The port names can be used to create a
/// [`SerialActuator`].
pub fn list_serial_ports() -> Result<Vec<String>> {
    available_ports()
        .context("Failed to get available ports")?
        .iter()
        .map(|p| Ok(p.port_name.to_string()))
        .collect()
}

/// Configuration for the serial actuator.
#[derive(Debug, Clone)]
pub struct SerialActuatorConfig {
    /// The name of the serial port. Use [`list_serial_ports`] to get a list of
    /// available ports.
    port_name: String,
    /// The baud rate of the serial port. The default is 115200.
    baud_rate: u32,
    /// Reference voltage of the DAC.
    vref: f64,
}

impl SerialActuatorConfig {
    pub fn new(port: String, settings: &ActuatorSettings) -> Self {
        SerialActuatorConfig {
            port_name: port,
            baud_rate: settings.baud_rate,
            vref: settings.vref,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Default for SerialActuatorConfig {
    fn default() -> Self {
        Self {
            #[cfg(target_os = "windows")]
            port_name: "COM3".to_string(),
            #[cfg(not(target_os = "windows"))]
            port_name: "/dev/ttyACM0".to_string(),
            baud_rate: 115200,
            vref: 5.1,
        }
    }
}

/// Drives the two DAC channels through a serial bridge.
pub struct SerialActuator {
    port: Box<dyn Write + Send>,
    dac: Mcp4728,
    last_codes: Option<(u16, u16)>,
}

impl SerialActuator {
    /// Open the serial port described by `config`.
    pub fn new(config: SerialActuatorConfig) -> Result<Self> {
        let SerialActuatorConfig {
            port_name,
            baud_rate,
            vref,
        } = config;

        let port = serialport::new(&port_name, baud_rate)
        .timeout(TIMEOUT)
        .open()
        .map_err(|err| {
            if let serialport::ErrorKind::Io(kind) = &err.kind {
                if kind == &std::io::ErrorKind::PermissionDenied {
                    anyhow!(r#"Permission denied. If you are on Linux, you may need to add your user to the dialout group. For Debian based systems, see (https://askubuntu.com/questions/210177/serial-port-terminal-cannot-open-dev-ttys0-permission-denied).For Arch based systems, see (https://github.com/esp8266/source-code-examples/issues/26#issuecomment-320999460)."#)
                } else {
                    err.into()
                }
            } else {
                err.into()
            }
        })
        .with_context(|| format!("Failed to open serial port {}", port_name))?;

        tracing::info!("Opened serial port {} at {} baud", port_name, baud_rate);
        Ok(Self::from_writer(Box::new(port), Mcp4728::new(vref)))
    }

    /// Drive the bridge through an arbitrary writer.
    pub fn from_writer(port: Box<dyn Write + Send>, dac: Mcp4728) -> Self {
        Self {
            port,
            dac,
            last_codes: None,
        }
    }

    /// Codes of the last successful write.
    pub fn last_codes(&self) -> Option<(u16, u16)> {
        self.last_codes
    }

    fn write_with_timeout(&mut self, cmd: &str) -> Result<()> {
        let mut buf = cmd.as_bytes();
        let start = Instant::now();
        loop {
            if buf.is_empty() {
                break;
            }
            if start.elapsed() > TIMEOUT {
                return Err(anyhow!("Timeout writing to serial port"));
            }

            match self.port.write(buf) {
                Ok(0) => return Err(anyhow!("Failed to write to serial port")),
                Ok(n) => buf = &buf[n..],
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.port.flush()?;
        Ok(())
    }
}

impl ActuatorSink for SerialActuator {
    fn set(&mut self, channel_a: f64, channel_b: f64) -> Result<()> {
        let codes = (self.dac.code(channel_a), self.dac.code(channel_b));
        let cmd = format_command(codes.0, codes.1);
        if let Err(err) = self.write_with_timeout(&cmd) {
            tracing::error!("Error writing to serial port: {}", err);
            return Err(err);
        }
        self.last_codes = Some(codes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            // Accept at most 4 bytes at a time to exercise partial writes
            let n = buf.len().min(4);
            self.0.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ClosedPort;

    impl Write for ClosedPort {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_set_writes_bridge_command() {
        let buffer = SharedBuffer::default();
        let mut actuator =
            SerialActuator::from_writer(Box::new(buffer.clone()), Mcp4728::default());

        actuator.set(2.5, 5.1).unwrap();
        actuator.set(0.0, 2.5).unwrap();

        let written = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, "a2007;b4095;W;\na0;b2007;W;\n");
        assert_eq!(actuator.last_codes(), Some((0, 2007)));
    }

    #[test]
    fn test_failed_write_is_reported() {
        let mut actuator = SerialActuator::from_writer(Box::new(ClosedPort), Mcp4728::default());
        assert!(actuator.set(2.5, 2.5).is_err());
        assert_eq!(actuator.last_codes(), None);
    }

    #[test]
    fn test_config_from_settings() {
        let config = SerialActuatorConfig::new("/dev/ttyUSB1".to_string(), &ActuatorSettings::default());
        assert_eq!(config.port_name(), "/dev/ttyUSB1");
        assert_eq!(config.baud_rate, 115200);
    }
}

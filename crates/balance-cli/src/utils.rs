use anyhow::{bail, Context, Result};
use balance_core::{ActuatorSettings, ActuatorSink};
use balance_serial_client::{
    list_serial_ports, DryRunActuator, SerialActuator, SerialActuatorConfig,
};

/// Which serial port to drive the DAC bridge through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortChoice {
    /// Use this port.
    Port(String),
    /// Ask the user to pick one of several ports.
    Prompt(Vec<String>),
    /// Run without hardware.
    DryRun,
}

/// Decide on a port from the `--serial-port` argument and the ports present.
pub fn choose_port(serial_port: &str, ports: &[String]) -> Result<PortChoice> {
    if serial_port == "false" {
        tracing::warn!("Serial disabled, running dry");
        return Ok(PortChoice::DryRun);
    }
    if serial_port != "auto" {
        if !ports.iter().any(|p| p == serial_port) {
            bail!(
                "Port {} not found. Available ports:\n{}",
                serial_port,
                ports
                    .iter()
                    .map(|p| format!("  - {}", p))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
        }
        return Ok(PortChoice::Port(serial_port.to_string()));
    }

    match ports {
        [] => {
            tracing::warn!("No serial ports found, running dry");
            Ok(PortChoice::DryRun)
        }
        [port] => {
            tracing::info!("Connecting to serial port {}", port);
            Ok(PortChoice::Port(port.clone()))
        }
        _ => Ok(PortChoice::Prompt(ports.to_vec())),
    }
}

/// Open the actuator sink selected by `--serial-port`.
pub fn setup_actuator(
    serial_port: &str,
    settings: &ActuatorSettings,
) -> Result<Box<dyn ActuatorSink>> {
    let ports = if serial_port == "false" {
        Vec::new()
    } else {
        list_serial_ports().context("Failed to list serial ports")?
    };

    let port = match choose_port(serial_port, &ports)? {
        PortChoice::Port(port) => Some(port),
        PortChoice::DryRun => None,
        PortChoice::Prompt(ports) => Some(prompt_port(&ports)?),
    };
    tracing::debug!("Serial port: {:?}", port);

    match port {
        Some(port) => {
            let config = SerialActuatorConfig::new(port, settings);
            Ok(Box::new(SerialActuator::new(config)?))
        }
        None => Ok(Box::new(DryRunActuator::new())),
    }
}

fn prompt_port(ports: &[String]) -> Result<String> {
    println!("Available ports:");
    for (idx, port) in ports.iter().enumerate() {
        println!("{}: {}", idx, port);
    }

    // Let user choose port
    loop {
        println!("Enter port number:");
        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            bail!("No port selected");
        }
        let port_idx = input
            .trim()
            .parse::<usize>()
            .context("Failed to parse the input into a number (usize)")?;
        if port_idx < ports.len() {
            break Ok(ports[port_idx].clone());
        }
        println!("Invalid port number");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_false_forces_dry_run() {
        assert_eq!(
            choose_port("false", &ports(&["/dev/ttyACM0"])).unwrap(),
            PortChoice::DryRun
        );
    }

    #[test]
    fn test_auto_selection() {
        assert_eq!(choose_port("auto", &[]).unwrap(), PortChoice::DryRun);
        assert_eq!(
            choose_port("auto", &ports(&["/dev/ttyACM0"])).unwrap(),
            PortChoice::Port("/dev/ttyACM0".to_string())
        );
        assert_eq!(
            choose_port("auto", &ports(&["/dev/ttyACM0", "/dev/ttyUSB0"])).unwrap(),
            PortChoice::Prompt(ports(&["/dev/ttyACM0", "/dev/ttyUSB0"]))
        );
    }

    #[test]
    fn test_named_port_must_exist() {
        let available = ports(&["/dev/ttyACM0"]);
        assert_eq!(
            choose_port("/dev/ttyACM0", &available).unwrap(),
            PortChoice::Port("/dev/ttyACM0".to_string())
        );
        let err = choose_port("/dev/ttyUSB3", &available).unwrap_err();
        assert!(err.to_string().contains("/dev/ttyACM0"));
    }
}

use balance_core::Position;

/// Resolve the positional setpoint arguments.
///
/// Overrides are only applied when exactly two finite numbers are given.
/// Anything else falls back to `defaults` with a warning.
pub fn parse_setpoints(args: &[String], defaults: Position) -> Position {
    match args {
        [] => defaults,
        [x, y] => match (parse_coordinate(x), parse_coordinate(y)) {
            (Some(x), Some(y)) => Position::new(x, y),
            _ => {
                tracing::warn!(
                    "Invalid setpoint values ({}, {}), using defaults ({}, {})",
                    x,
                    y,
                    defaults.x,
                    defaults.y
                );
                defaults
            }
        },
        _ => {
            tracing::warn!(
                "Expected two setpoint values (X Y), got {}; using defaults ({}, {})",
                args.len(),
                defaults.x,
                defaults.y
            );
            defaults
        }
    }
}

fn parse_coordinate(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

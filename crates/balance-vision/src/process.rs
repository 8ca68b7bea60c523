use std::process::Command;

/// Start the child in a process group of its own. An interrupt typed in the
/// terminal then reaches only the control process, which stops its children
/// during shutdown.
pub(crate) fn own_process_group(command: &mut Command) -> &mut Command {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    fn process_group_of_self() -> String {
        let stat = std::fs::read_to_string("/proc/self/stat").unwrap();
        let after_name = &stat[stat.rfind(')').unwrap() + 1..];
        after_name.split_whitespace().nth(2).unwrap().to_owned()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_child_leads_its_own_process_group() {
        let output = own_process_group(
            Command::new("sh").args(["-c", "echo $$; cut -d' ' -f5 /proc/$$/stat"]),
        )
        .output()
        .unwrap();
        assert!(output.status.success());

        let text = String::from_utf8(output.stdout).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2, "{:?}", lines);
        assert_eq!(lines[0], lines[1], "child pid and process group differ");
        assert_ne!(lines[1], process_group_of_self());
    }
}

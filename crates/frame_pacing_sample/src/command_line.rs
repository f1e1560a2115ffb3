use std::path::PathBuf;

/// Switches the sample understands. Both `-name` and `/name` spellings are accepted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampleCommandLine {
    pub use_warp_device: bool,
    /// Drive a real Direct3D12 queue instead of the simulated one (Windows only).
    pub use_d3d12: bool,
    pub config_path: Option<PathBuf>,
}

/// Builds a SampleCommandLine from the process arguments
pub fn build_command_line() -> SampleCommandLine {
    parse_command_line(std::env::args().skip(1))
}

pub fn parse_command_line(args: impl IntoIterator<Item = String>) -> SampleCommandLine {
    let mut command_line = SampleCommandLine::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let Some(switch) = arg.strip_prefix('-').or_else(|| arg.strip_prefix('/')) else {
            continue;
        };
        if switch.eq_ignore_ascii_case("warp") {
            command_line.use_warp_device = true;
        } else if switch.eq_ignore_ascii_case("d3d12") {
            command_line.use_d3d12 = true;
        } else if switch.eq_ignore_ascii_case("config") {
            command_line.config_path = args.next().map(PathBuf::from);
        }
    }

    command_line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> SampleCommandLine {
        parse_command_line(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn switches_are_case_insensitive() {
        let command_line = parse(&["/WARP", "-D3D12"]);
        assert!(command_line.use_warp_device);
        assert!(command_line.use_d3d12);
    }

    #[test]
    fn config_takes_the_next_argument() {
        let command_line = parse(&["-config", "pacing.toml", "stray"]);
        assert_eq!(command_line.config_path, Some(PathBuf::from("pacing.toml")));
        assert!(!command_line.use_warp_device);
    }

    #[test]
    fn no_arguments_means_defaults() {
        assert_eq!(parse(&[]), SampleCommandLine::default());
    }
}

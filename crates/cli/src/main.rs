use std::process::ExitCode;

fn main() -> ExitCode {
    sitegate_cli::run()
}

use std::process::ExitCode;

fn main() -> ExitCode {
    rulegate_cli::run()
}

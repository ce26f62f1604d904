use clap::Parser;
use stockbook::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}

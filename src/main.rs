mod check;
mod cli;
mod client;
mod utils;

use clap::Parser;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let output = check::run_check(&cli);

    // Exactly one status line, exit code carries the verdict
    println!("{}", output.render());
    std::process::exit(output.exit_code());
}

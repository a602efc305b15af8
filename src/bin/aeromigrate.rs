//! aeromigrate command-line entry point

use aeromigrate::cli;

fn main() {
    if let Err(e) = cli::run() {
        if cli::io::write_error(&e).is_err() {
            eprintln!("{}", e);
        }
        std::process::exit(e.exit_code());
    }
}

//! failsafe-kv demo binary
//!
//! Runs one access-layer operation against a seeded in-memory cluster and
//! prints a JSON response. The response is already on stdout when an error
//! reaches here; stderr gets the short form and the exit status is 1.

use failsafe_kv::cli;

fn main() {
    if let Err(err) = cli::run() {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

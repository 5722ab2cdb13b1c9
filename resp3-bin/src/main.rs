#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]

//! Default binary; the actual tooling lives in `src/bin/`.

fn main() {
    eprintln!("resp3-bin ships a command line client.");
    eprintln!("Run it with: cargo run --bin cli -- --help");
    std::process::exit(2);
}

//! buildrelay CLI binary
//!
//! All logic is in the library; main only maps the exit code.

fn main() {
    // cli::run() prints its own errors
    if let Err(code) = buildrelay::cli::run() {
        std::process::exit(code.as_i32());
    }
}

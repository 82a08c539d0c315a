fn main() {
    if let Err(e) = mismatch_scanner_lib::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

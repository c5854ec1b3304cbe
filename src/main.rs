fn main() {
    if let Err(err) = muni_link::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

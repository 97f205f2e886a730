fn main() {
    if let Err(err) = sheet_facets::run() {
        eprintln!("error: {err:#}");
        std::process::exit(sheet_facets::exit_code(&err));
    }
}

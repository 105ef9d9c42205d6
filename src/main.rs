fn main() {
    if let Err(err) = moleopt::cli::run() {
        if moleopt::exit::is_quiet_exit(&err) {
            eprintln!("{err}");
        } else {
            moleopt::ui::eprintln_error(&err);
        }
        std::process::exit(moleopt::exit::exit_code(&err));
    }
}

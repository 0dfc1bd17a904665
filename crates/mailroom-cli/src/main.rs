#![forbid(unsafe_code)]

fn main() {
    std::process::exit(mailroom_cli::run());
}

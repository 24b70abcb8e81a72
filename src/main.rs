use clap::Parser;

fn main() {
    let args = rcro::cli::Args::parse();
    if let Err(err) = rcro::run(args) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "rcro", version, about = "Convert between ELF shared objects and CRO modules")]
pub struct Args {
    #[arg(long = "verbose", short = 'v')]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert an ELF shared object into a CRO module.
    Pack {
        #[arg(value_name = "INPUT")]
        input: String,

        #[arg(value_name = "OUTPUT")]
        output: String,

        /// Module name to embed; defaults to the output file stem.
        #[arg(long = "name")]
        name: Option<String>,
    },
    /// Convert a CRO module back into an ELF shared object.
    Unpack {
        #[arg(value_name = "INPUT")]
        input: String,

        #[arg(value_name = "OUTPUT")]
        output: String,
    },
}

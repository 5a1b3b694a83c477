use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::generate::GenerateArgs;
use crate::config::library::LibraryArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(long, global = true, env = "NVIDIA_CDI_DEBUG", help = "Enable debug logging")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a CDI specification for the NVIDIA devices of this host
    Generate(Box<GenerateArgs>),
    /// List the fully-qualified names of the CDI devices that would be generated
    List(ListArgs),
}

#[derive(Parser)]
pub struct ListArgs {
    #[command(flatten)]
    pub library: LibraryArgs,
}

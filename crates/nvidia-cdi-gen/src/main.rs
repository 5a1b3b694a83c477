mod config;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use nvcdi::Library;
use utils::logging;
use utils::version;

use crate::config::nvcdi_error;
use crate::config::Cli;
use crate::config::Commands;
use crate::config::GenerateArgs;
use crate::config::ListArgs;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    logging::init(logging::default_level(cli.debug));

    match cli.command {
        Commands::Generate(args) => run_generate(*args),
        Commands::List(args) => run_list(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    tracing::info!("Starting nvidia-cdi-gen {}", &**version::VERSION);

    let options = args.options()?;
    let format = args.format()?;
    let lib = Library::new(options);
    let ids = args.device_ids(&lib)?;
    tracing::debug!("Generating {} spec for {ids:?}", lib.kind());

    let mut spec = lib
        .get_spec(&ids)
        .map_err(nvcdi_error)
        .context("failed to generate CDI spec")?;

    match &args.output {
        Some(path) => {
            if let Some(format) = format {
                spec.set_format(format);
            }
            let written = spec.save(path).map_err(nvcdi_error)?;
            tracing::info!("Wrote CDI spec to {}", written.display());
        }
        None => {
            spec.set_format(format.unwrap_or_default());
            spec.write_to(&mut std::io::stdout().lock())
                .map_err(nvcdi_error)?;
        }
    }
    Ok(())
}

fn run_list(args: ListArgs) -> Result<()> {
    let lib = Library::new(args.library.options()?);
    let devices = lib
        .list_devices()
        .map_err(nvcdi_error)
        .context("failed to list CDI devices")?;

    tracing::info!("Found {} CDI devices", devices.len());
    for device in devices {
        println!("{device}");
    }
    Ok(())
}

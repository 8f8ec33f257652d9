use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use plcfw_core::transport::OpKind;
use plcfw_core::{
    FirmwareAnalysis, FirmwareLoader, IoReader, LoaderConfig, MacAddr, MockTransport, Reader,
    SectionKind, parse_container,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "G.hn PLC modem firmware loader", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print an analysis report of a firmware container
    Inspect {
        /// Firmware container (.bin)
        firmware: PathBuf,
    },
    /// Run a complete load against the simulated device
    Verify {
        /// Firmware container (.bin)
        firmware: PathBuf,

        /// User configuration binary (defaults to the container's own)
        #[arg(long)]
        user_config: Option<PathBuf>,

        /// Board uses an RMII Ethernet link
        #[arg(long)]
        rmii: bool,

        /// MAC address of the local adapter
        #[arg(long, default_value = "02:00:00:00:00:01")]
        adapter_mac: MacAddr,

        /// Loader configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write the default loader configuration as TOML
    Config {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args.command) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Inspect { firmware } => inspect(&firmware),
        Command::Verify {
            firmware,
            user_config,
            rmii,
            adapter_mac,
            config,
        } => verify(&firmware, user_config.as_deref(), rmii, adapter_mac, config.as_deref()),
        Command::Config { output } => {
            let config = LoaderConfig::default();
            match output {
                Some(path) => {
                    config
                        .save_to_file(&path)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(path = %path.display(), "Default configuration written");
                }
                None => print!("{}", config.to_toml()?),
            }
            Ok(())
        }
    }
}

fn inspect(path: &Path) -> Result<()> {
    let mut reader =
        IoReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let analysis = FirmwareAnalysis::analyze(&mut reader)
        .with_context(|| format!("parsing {}", path.display()))?;

    print!("{}", analysis.to_text());

    let failed = analysis.validations.iter().filter(|v| !v.passed).count();
    if failed > 0 {
        bail!("{} check(s) failed", failed);
    }
    Ok(())
}

fn verify(
    path: &Path,
    user_config: Option<&Path>,
    rmii: bool,
    adapter_mac: MacAddr,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = match config_path {
        Some(p) => LoaderConfig::load_from_file(p)
            .with_context(|| format!("loading config {}", p.display()))?,
        None => LoaderConfig::default(),
    };

    let mut firmware =
        IoReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut user_config: Box<dyn Reader> = match user_config {
        Some(p) => Box::new(
            IoReader::open(p).with_context(|| format!("opening {}", p.display()))?,
        ),
        None => Box::new(default_user_config(&mut firmware, config.user_config_size)?),
    };

    let transport = MockTransport::default();
    FirmwareLoader::new(&transport, config)
        .load_firmware(adapter_mac, &mut firmware, &mut *user_config, rmii)
        .context("dry-run load failed")?;

    println!("Dry run OK: device {} reached running firmware", transport.mac());
    println!("  operations:     {}", transport.ops().len());
    println!("  memory writes:  {}", transport.count(OpKind::WriteMemory));
    println!("  image packets:  {}", transport.count(OpKind::SetImageData));
    println!("  cores started:  {}", transport.count(OpKind::Execute));
    Ok(())
}

/// The container's user-config section, zero padded to `size` bytes.
fn default_user_config(firmware: &mut IoReader<std::fs::File>, size: u32) -> Result<Vec<u8>> {
    let table = parse_container(firmware).context("parsing firmware container")?;
    let section = table.get(SectionKind::UserConfig);
    let mut bytes = firmware.read_at(section.offset, section.size as usize)?;
    if bytes.len() < size as usize {
        bytes.resize(size as usize, 0);
    }
    info!(
        size = section.size,
        "Using the user configuration embedded in the container"
    );
    Ok(bytes)
}

use anyhow::Result;
use clap::Parser;
use kensure::{commands, telemetry};

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

/// Create every manifest in a directory on a Kubernetes cluster, retrying
/// until all of them exist
#[derive(Parser)]
#[command(name = "kensure")]
#[command(version = env!("KENSURE_VERSION"))]
struct Cli {
	#[command(flatten)]
	args: commands::ensure::EnsureArgs,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let _telemetry = telemetry::init(cli.args.log_level)?;

	commands::ensure::run(cli.args, std::io::stdout().lock())
}

use std::{
    io::Read,
    path::PathBuf,
    time::Instant,
};

use anyhow::{
    anyhow,
    bail,
    Context,
    Result,
};
use clap::{
    ArgAction,
    Parser,
};
use memopt_middle::{
    optimization::{
        PassId,
        PipelineConfig,
        RemarkSink,
    },
    Module,
};
use strum::IntoEnumIterator;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(name = "memopt")]
#[command(version, about)]
struct Args {
    /// The textual IR to optimize. Read from stdin if omitted
    input: Option<PathBuf>,
    /// Comma separated list of passes to run, in order
    #[arg(
        short,
        long,
        value_delimiter = ',',
        default_value = "redundant-load-elim"
    )]
    passes: Vec<PassId>,
    /// Where to write the optimized IR to. Defaults to stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Verify the module after optimizing it and fail if it is malformed
    #[arg(long)]
    verify: bool,
    /// Print all available passes and exit
    #[arg(long)]
    list_passes: bool,
    /// Increase logging verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn list_passes() -> String {
    PassId::iter()
        .map(|pass| format!("{pass}\t{}\n", pass.description()))
        .collect()
}

fn read_input(input: Option<&PathBuf>) -> Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut source = String::new();
            std::io::stdin()
                .read_to_string(&mut source)
                .context("Failed to read from stdin")?;
            Ok(source)
        }
    }
}

/// Parses `source`, runs the pipeline on it and renders the result.
fn optimize_source(source: &str, config: PipelineConfig, verify: bool) -> Result<String> {
    let start = Instant::now();
    let module = memopt_front::parse(source)
        .map_err(|e| anyhow!("Failed to parse module: {e}"))?;
    let mut module = Module::try_from(module).context("Failed to lower module")?;
    debug!("Took {:?} to parse module", start.elapsed());
    module.optimize(config);
    if verify {
        let errors = module
            .verify()
            .into_iter()
            .map(|(function_ref, error)| {
                let function = &module.functions[function_ref];
                format!("@{}: {}", function.name, error.display(&function.cfg))
            })
            .collect::<Vec<_>>();
        if !errors.is_empty() {
            bail!("Module is malformed after optimization:\n{}", errors.join("\n"));
        }
    }
    Ok(module.to_string())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    if args.list_passes {
        print!("{}", list_passes());
        return Ok(());
    }
    let source = read_input(args.input.as_ref())?;
    let config = PipelineConfig::with_passes(args.passes.iter().copied()).remarks(RemarkSink::Stderr);
    let output = optimize_source(&source, config, args.verify)?;
    match &args.output {
        Some(path) => std::fs::write(path, output)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{output}"),
    }
    Ok(())
}

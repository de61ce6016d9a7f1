//! cosim - CLI

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cosim::runtime::scheduler;
use cosim::util::config::{self, RuntimeConfig};
use cosim::util::logger::{self, LogLevel};
use cosim::{install_runtime, invoke_hw_default, EmulatedRuntime, InvokeMode, KernelArgs, Mmap, Seq, Task, NAME, VERSION};
use parking_lot::Mutex;

/// Task invocation and execution-mode dispatch demos
#[derive(Parser, Debug)]
#[command(name = "cosim")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ./cosim.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the vector-add demo through the hardware entry point
    Vadd {
        /// Number of elements
        #[arg(short, long, default_value_t = 1024)]
        n: u64,

        /// Bitstream path; omitted means software simulation
        #[arg(short, long, value_name = "PATH")]
        bitstream: Option<PathBuf>,

        /// Drive the device in this process instead of a forked child
        #[arg(long)]
        no_isolate: bool,
    },

    /// Build a producer/worker task graph and print the run order
    Pipeline {
        /// Number of worker children
        #[arg(short, long, default_value_t = 4)]
        stages: usize,

        /// Worker mode: sequential, join, detach, or a packed integer
        #[arg(short, long, default_value = "join")]
        mode: InvokeMode,
    },

    /// Print the effective configuration
    Config {
        /// Write the default configuration to the config path
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match args.command {
        // the file may not exist yet
        Commands::Config { init: true } => RuntimeConfig::default()
            .with_env()
            .context("Failed to load config")?,
        _ => load(args.config.as_ref())?,
    };
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        config.log_level()
    };
    logger::init_with_level(level);
    config::install(config.clone());

    match args.command {
        Commands::Vadd {
            n,
            bitstream,
            no_isolate,
        } => vadd(n, bitstream, config.run_in_new_process && !no_isolate),
        Commands::Pipeline { stages, mode } => {
            pipeline(stages, mode);
            Ok(())
        }
        Commands::Config { init } => {
            let path = args.config.unwrap_or_else(config::default_config_path);
            if init {
                config::save_config(&RuntimeConfig::default(), &path)
                    .with_context(|| format!("Failed to write config: {}", path.display()))?;
                eprintln!("Wrote {}", path.display());
            } else {
                let text = toml::to_string_pretty(&config).context("Failed to render config")?;
                print!("{}", text);
            }
            Ok(())
        }
    }
}

fn load(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => config::load_config(path)
            .and_then(RuntimeConfig::with_env)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => config::load_config_or_default().context("Failed to load config"),
    }
}

/// Software body of the vector-add task.
fn vadd_task(
    a: Mmap<f32>,
    b: Mmap<f32>,
    c: Mmap<f32>,
    n: u64,
) {
    let lhs = a.to_vec();
    let rhs = b.to_vec();
    c.with_mut(|out| {
        for i in 0..n as usize {
            out[i] = lhs[i] + rhs[i];
        }
    });
}

/// Device body of the vector-add kernel.
fn vadd_kernel(args: &mut KernelArgs<'_>) -> Result<(), String> {
    let a = args.buffer::<f32>(0).ok_or("argument 0 is not a buffer")?;
    let b = args.buffer::<f32>(1).ok_or("argument 1 is not a buffer")?;
    let n = args
        .scalar(3)
        .and_then(|v| v.as_i64())
        .ok_or("argument 3 is not an integer")? as usize;
    if a.len() < n || b.len() < n {
        return Err(format!("n = {} exceeds buffer length", n));
    }
    let c: Vec<f32> = a.iter().zip(&b).take(n).map(|(x, y)| x + y).collect();
    if !args.write_buffer(2, &c) {
        return Err("argument 2 is not a buffer".to_string());
    }
    Ok(())
}

fn vadd(
    n: u64,
    bitstream: Option<PathBuf>,
    run_in_new_process: bool,
) -> Result<()> {
    install_runtime(Arc::new(EmulatedRuntime::new().with_kernel("vadd", vadd_kernel)));

    let lhs: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let rhs: Vec<f32> = (0..n).map(|i| (2 * i) as f32).collect();
    let a = Mmap::read_only(&lhs).context("Failed to map input a")?;
    let b = Mmap::read_only(&rhs).context("Failed to map input b")?;
    let c = Mmap::<f32>::write_only(n as usize).context("Failed to map output c")?;

    let ns = invoke_hw_default(
        run_in_new_process,
        vadd_task,
        bitstream.as_deref(),
        (a, b, c.clone(), n),
    )
    .context("vadd invocation failed")?;

    let out = c.to_vec();
    let bad = out
        .iter()
        .enumerate()
        .filter(|(i, v)| **v != lhs[*i] + rhs[*i])
        .count();
    println!("elapsed: {} ns", ns);
    if bad > 0 {
        bail!("{} of {} results are wrong", bad, n);
    }
    println!("PASS ({} elements)", n);
    Ok(())
}

fn pipeline(
    stages: usize,
    mode: InvokeMode,
) {
    let order = Arc::new(Mutex::new(Vec::new()));
    {
        let produced = order.clone();
        let worked = order.clone();
        Task::new()
            .invoke_named(
                "producer",
                move |items: usize| produced.lock().push(format!("producer({})", items)),
                (stages,),
            )
            .invoke_with(
                mode,
                stages,
                "worker",
                move |id: usize| {
                    worked.lock().push(format!("worker[{}]", id));
                    scheduler::yield_now();
                },
                (Seq::new(),),
            );
    }
    let drained = scheduler::run_until_idle();
    if drained > 0 {
        eprintln!("drained {} detached children", drained);
    }
    for (i, entry) in order.lock().iter().enumerate() {
        println!("{:>3}  {}", i, entry);
    }
}

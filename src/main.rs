use clap::{Parser, Subcommand};
use pyramid_scaler::config;
use pyramid_scaler::imaging::{ImageBackend, RustBackend};
use pyramid_scaler::params::{ErrorFormat, Modes};
use pyramid_scaler::runner::ExecutionMode;
use pyramid_scaler::{ParameterMap, Reply, Scaler};
use std::path::PathBuf;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup, called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "pyramid-scaler")]
#[command(about = "Scaled and transformed views of multi-resolution images")]
#[command(long_about = "\
Scaled and transformed views of multi-resolution images

Images are stored as pyramids: the same file tree under several base
directories, each at a lower resolution. Every request picks the cheapest
resolution that still satisfies it.

Requests are query strings:

  fn=books/vol1/p001      image path (or directory, with pn=page)
  dw=800 dh=600           destination box (one may be 0 = from aspect)
  wx wy ww wh             window, relative 0..1
  rot=90                  rotation in degrees
  cont brgt rgbm rgba     contrast, brightness, per-channel color
  colop=grayscale         grayscale | ntsc_gray | invert
  mo=fit,q2,hmir          mode flags:
                            fit clip osize ascale   target mode
                            hires lores autores     resolution choice
                            q0 q1 q2                interpolation quality
                            jpg png                 output type
                            hmir vmir               mirror
                            file rawfile            send source file
                            errtxt errimg           error rendering

Run 'pyramid-scaler gen-config' to generate a documented scaler.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Directory containing scaler.toml; relative base dirs resolve against it
    #[arg(long, default_value = ".", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct RenderArgs {
    /// Request as a query string, e.g. "fn=books/p001&dw=800&mo=png"
    #[arg(long)]
    query: String,

    /// File the response body is written to
    #[arg(long)]
    out: PathBuf,

    /// Run the job on the worker pool instead of this thread
    #[arg(long = "async")]
    run_async: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Render one request and write the result to a file
    Render(RenderArgs),
    /// Print the resolved plan of a request as JSON
    Plan {
        /// Request as a query string
        #[arg(long)]
        query: String,
    },
    /// Print pixel size, type and resolution of an image file
    Inspect {
        /// Image file to inspect
        file: PathBuf,
    },
    /// Print a stock scaler.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Render(args) => {
            let scaler = Scaler::from_config(config::load_config(&cli.config)?)?;
            let params = ParameterMap::from_query(&args.query);
            let mode = if args.run_async {
                ExecutionMode::Async
            } else {
                ExecutionMode::Sync
            };
            match scaler.process(&params, mode).and_then(Reply::wait) {
                Ok(image) => {
                    std::fs::write(&args.out, &image.bytes)?;
                    println!(
                        "{} ({} bytes) → {}",
                        image.mime,
                        image.bytes.len(),
                        args.out.display()
                    );
                }
                Err(e) => {
                    if Modes::from_options(params.options()).errors == ErrorFormat::Text {
                        println!("{}", serde_json::to_string_pretty(&e.report())?);
                    }
                    return Err(e.into());
                }
            }
        }
        Command::Plan { query } => {
            let scaler = Scaler::from_config(config::load_config(&cli.config)?)?;
            let plan = scaler.plan(&ParameterMap::from_query(&query))?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Command::Inspect { file } => {
            let backend = RustBackend::new();
            let info = backend.inspect(&file)?;
            let resolution = backend.read_resolution(&file);
            let json = serde_json::json!({
                "file": file,
                "size": info.size,
                "mime": info.mime,
                "resolution": resolution,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

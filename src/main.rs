use clap::Parser;
use console::style;
use kamado::{LiveServer, preset};

/// Builds the front-end sources under `src/` into `dist/`.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// `clean`, `build`, `serve`, `start`, or the name of a single task.
    #[arg(index = 1, default_value = "build")]
    task: String,

    /// Port of the development server.
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    kamado::init_logging();

    let pipeline = preset::standard()?.finish()?;

    eprintln!(
        "{} {}",
        style("kamado").bold().red(),
        style(&args.task).dim()
    );

    match args.task.as_str() {
        "clean" => {
            pipeline.clean()?;
        }
        "build" => {
            pipeline.build()?;
        }
        "serve" => {
            pipeline.serve(&mut LiveServer::new().port(args.port))?;
        }
        "start" => {
            pipeline.start(&mut LiveServer::new().port(args.port))?;
        }
        name => {
            pipeline.run(name)?;
        }
    }

    Ok(())
}

mod cmd;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatstream")]
#[command(version = "0.5.0")]
#[command(about = "Stream chat replies with their reasoning shown inline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt, or start an interactive chat when none is given
    Chat {
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
        #[arg(short, long)]
        system: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long)]
        template: Option<String>,
        #[arg(long)]
        no_stream: bool,
        #[arg(long)]
        no_smooth: bool,
    },
    /// Render a recorded SSE or NDJSON body
    Replay {
        file: PathBuf,
        #[arg(short, long)]
        template: Option<String>,
        #[arg(long)]
        no_smooth: bool,
    },
    /// Split a reasoning block out of text
    Parse {
        text: String,
        /// Match the block anywhere instead of only at the start
        #[arg(long)]
        loose: bool,
        #[arg(short, long)]
        template: Option<String>,
    },
    /// List the built-in reasoning templates
    Templates,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Chat {
            prompt,
            system,
            model,
            template,
            no_stream,
            no_smooth,
        } => {
            let options = cmd::ChatOptions {
                system,
                model,
                template,
                stream: !no_stream,
                smooth: !no_smooth,
            };
            cmd::chat(prompt, options).await
        }
        Commands::Replay {
            file,
            template,
            no_smooth,
        } => cmd::replay(&file, template.as_deref(), !no_smooth).await,
        Commands::Parse { text, loose, template } => cmd::parse(&text, !loose, template.as_deref()),
        Commands::Templates => cmd::templates(),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

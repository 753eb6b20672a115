use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use yarals::compiler::YaracCompiler;
use yarals::server::YaraLanguageServer;

#[derive(Parser, Debug)]
#[command(name = "yarals", version, about = "Language server for YARA rule files")]
struct Args {
    /// Interface to listen on.
    #[arg(default_value = "127.0.0.1")]
    host: String,
    /// Port to listen on.
    #[arg(default_value_t = 8471)]
    port: u16,
    /// Increase log verbosity; repeat for trace output.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();
    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let compiler = YaracCompiler::discover();
    if compiler.is_none() {
        tracing::warn!("yarac not found on PATH, diagnostics are disabled");
    }
    let server = Arc::new(YaraLanguageServer::new(compiler));

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    tracing::info!(host = %args.host, port = args.port, "serving yarals");
    server.serve(listener).await
}

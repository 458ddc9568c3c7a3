use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use mqhandle::{Client, ClientBuilder, ClientOptions, Library, LibraryOptions};
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Allocates one client handle, prints its address and cleans the library up again.
#[derive(Parser, Debug)]
#[command(name = "mqhandle-smoke")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Client identifier, generated when omitted
    #[arg(long, env = "MQHANDLE_CLIENT_ID")]
    client_id: Option<String>,

    /// Ask the broker to keep session state (requires --client-id)
    #[arg(long)]
    no_clean_session: bool,

    /// Maximum number of live client handles
    #[arg(long, env = "MQHANDLE_MAX_CLIENTS")]
    max_clients: Option<usize>,

    /// Broker address to probe with a CONNECT/DISCONNECT round trip
    #[arg(long, env = "MQHANDLE_BROKER")]
    broker: Option<String>,

    /// JSON file with client options
    #[arg(long, env = "MQHANDLE_OPTIONS")]
    options: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error or a full directive)
    #[arg(long, env = "MQHANDLE_LOG", default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_level))
        .with_writer(std::io::stderr)
        .finish()
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let options = match &args.options {
        Some(path) => {
            let options: ClientOptions = serde_json::from_slice(&std::fs::read(path)?)?;
            Some(options)
        }
        None => None,
    };

    let library = Library::with_options(LibraryOptions {
        max_clients: args.max_clients,
        ..Default::default()
    });

    let mut builder = ClientBuilder::new().clean_session(!args.no_clean_session);
    if let Some(client_id) = &args.client_id {
        builder = builder.client_id(client_id.as_str());
    }
    if let Some(options) = options {
        builder = builder.options(options);
    }

    let client: Client = builder.build(&library, ())?;
    println!("create client instance : {client:p}");

    if let Some(broker) = &args.broker {
        let ack = client.probe(broker.as_str()).await?;
        tracing::info!(
            client_id = client.id(),
            session_present = ack.session_present,
            "Broker accepted client."
        );
        println!("broker {broker} accepted client {}", client.id());
    }

    library.cleanup();
    println!("client instance cleanup done.");

    Ok(())
}

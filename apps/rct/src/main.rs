use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use rct::client::ConnectionManager;
use rct::command::CommandProcessor;
use rct::config::{Config, DEFAULT_PORT};
use rct::console::stdio::StdioConsole;
use rct::server::RctServer;
use rct::terminal::OperatorTerminal;

#[derive(Parser, Debug)]
#[command(
    name = "rct",
    about = "Remote command terminal for an embedded controller",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "RCT_LOG_LEVEL",
        default_value = "warn",
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    log_level: String,

    #[arg(
        long,
        env = "RCT_HOST",
        default_value = "127.0.0.1",
        help = "Controller hostname to connect to"
    )]
    host: String,

    #[arg(long, env = "RCT_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the controller-side server with the demo command set.
    Host {
        #[arg(long, default_value = "0.0.0.0", help = "Address to listen on")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    rct::telemetry::init_tracing(&cli.log_level);
    let config = Config::from_env();

    match cli.command {
        Some(Command::Host { bind }) => run_host(&bind, cli.port, config).await,
        None => run_operator(&cli.host, cli.port, config).await,
    }
}

async fn run_operator(host: &str, port: u16, config: Config) -> anyhow::Result<()> {
    let addr = resolve(host, port).await?;
    let console = Arc::new(StdioConsole::new());
    let manager = ConnectionManager::new(addr, config);
    manager.set_log_console(console.clone());
    let poll_task = manager.start();

    let terminal = OperatorTerminal::new(console, manager);
    let result = terminal.run().await;
    poll_task.abort();
    result.context("operator console failed")
}

async fn run_host(bind: &str, port: u16, config: Config) -> anyhow::Result<()> {
    let addr = resolve(bind, port).await?;
    let mut server = RctServer::new(config);
    server
        .register_command(CommandProcessor::new(
            "echo",
            "echo [words...]",
            "print the arguments back",
            |console, command| async move {
                console.println(&command.args().join(" "));
                Ok(())
            },
        ))
        .context("register echo")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    server.serve(listener).await.context("server failed")
}

async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("resolve {host}:{port}"))?
        .next()
        .with_context(|| format!("no address for {host}:{port}"))
}

use anyhow::Result;
use bridge_mcp::transport::{ConnectOptions, TransportKind};
use bridge_mcp::types::ContentItem;
use bridge_mcp::{execute_tool, fetch_tools, parse_arguments, parse_headers};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mcp-bridge")]
#[command(about = "Invoke tools on a remote MCP server", long_about = None)]
struct Cli {
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// MCP server URL
    #[arg(long)]
    server_url: String,

    /// Extra HTTP headers as a JSON object
    #[arg(long)]
    headers: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// SSE read timeout in seconds
    #[arg(long, default_value_t = 300)]
    sse_read_timeout: u64,

    /// Transport selection: auto, sse, or streamable-http
    #[arg(long, default_value = "auto")]
    transport: TransportKind,
}

#[derive(Subcommand)]
enum Commands {
    /// List tools advertised by the server
    Tools {
        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Call a named tool with JSON arguments
    Call {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Name of the tool to invoke
        tool_name: String,

        /// Tool arguments as a JSON object
        #[arg(long)]
        arguments: Option<String>,
    },
}

impl ConnectionArgs {
    fn to_options(&self) -> Result<ConnectOptions> {
        let headers = parse_headers(self.headers.as_deref())?;
        Ok(ConnectOptions::new(&self.server_url)
            .with_headers(headers)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_sse_read_timeout(Duration::from_secs(self.sse_read_timeout)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Tools { connection } => {
            info!("Listing tools from {}", connection.server_url);
            let options = connection.to_options()?;
            let tools = fetch_tools(connection.transport, &options).await?;
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
        Commands::Call {
            connection,
            tool_name,
            arguments,
        } => {
            info!("Calling tool '{tool_name}' on {}", connection.server_url);
            let options = connection.to_options()?;
            let arguments = parse_arguments(arguments.as_deref())?;
            let content = execute_tool(connection.transport, &options, &tool_name, arguments).await?;
            print_content(&content)?;
        }
    }

    Ok(())
}

/// Print text results verbatim, everything else as JSON
fn print_content(content: &[ContentItem]) -> Result<()> {
    let all_text = content
        .iter()
        .all(|item| matches!(item, ContentItem::Text { .. }));

    if all_text && !content.is_empty() {
        for item in content {
            if let ContentItem::Text { text } = item {
                println!("{text}");
            }
        }
    } else {
        println!("{}", serde_json::to_string_pretty(content)?);
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

use anyhow::Result;
use argh::FromArgs;
use gridrpc_cli::{build_client, call, load_config, parse_call_args, start_hello_service, TokenGrant};
use gridrpc_server::PING_METHOD;
use tracing_subscriber::EnvFilter;

#[derive(FromArgs, Debug)]
/// gridrpc - host and call gridrpc services
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
    Ping(PingArgs),
}

#[derive(FromArgs, Debug)]
/// Host the Hello service described in a configuration file
#[argh(subcommand, name = "serve")]
struct ServeArgs {
    /// configuration file (JSON)
    #[argh(option, short = 'c')]
    config: String,

    /// service name, as System/Service
    #[argh(option, short = 's', default = "\"Framework/Hello\".into()")]
    service: String,

    /// listen address, overriding the configured port
    #[argh(option, short = 'b')]
    bind: Option<String>,

    /// accepted token, as token=identity[@group] (repeatable)
    #[argh(option, short = 't')]
    accept_token: Vec<TokenGrant>,
}

#[derive(FromArgs, Debug)]
/// Call a method on a service
#[argh(subcommand, name = "call")]
struct CallArgs {
    /// service name, as System/Service
    #[argh(option, short = 's')]
    service: String,

    /// configuration file providing the service URLs
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// call this URL only instead of the configured endpoints
    #[argh(option, short = 'u')]
    url: Option<String>,

    /// token presented on token-protocol endpoints
    #[argh(option, short = 't')]
    token: Option<String>,

    /// extra group to act as
    #[argh(option, short = 'g')]
    group: Option<String>,

    /// method name
    #[argh(positional)]
    method: String,

    /// arguments as a JSON array
    #[argh(positional, default = "\"[]\".into()")]
    args: String,
}

#[derive(FromArgs, Debug)]
/// Ping a service
#[argh(subcommand, name = "ping")]
struct PingArgs {
    /// service name, as System/Service
    #[argh(option, short = 's')]
    service: String,

    /// configuration file providing the service URLs
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// ping this URL only
    #[argh(option, short = 'u')]
    url: Option<String>,

    /// token presented on token-protocol endpoints
    #[argh(option, short = 't')]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call and ping print JSON on stdout; keep it clean
    if let Commands::Serve(_) = &cli.command {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Call(args) => run_call(args).await,
        Commands::Ping(args) => run_ping(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let store = load_config(&args.config)?;
    let service = start_hello_service(&store, &args.service, args.bind.as_deref(), args.accept_token).await?;
    tracing::info!("listening on {}", service.local_addr()?);

    let shutdown = service.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            shutdown.shutdown();
        }
    });

    service.run().await?;
    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    let store = args.config.as_deref().map(load_config).transpose()?;
    let client = build_client(store.as_ref(), &args.service, args.token, args.group)?;
    let call_args = parse_call_args(&args.args)?;

    let value = call(&client, args.url.as_deref(), &args.method, call_args).await?;
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

async fn run_ping(args: PingArgs) -> Result<()> {
    let store = args.config.as_deref().map(load_config).transpose()?;
    let client = build_client(store.as_ref(), &args.service, args.token, None)?;

    let value = call(&client, args.url.as_deref(), PING_METHOD, Vec::new()).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

use clap::Parser;
use remote_server::{
    limits::ServerLimits, ContentType, HandlerError, Request, Response, Server, ServerManager,
};
use std::{
    error::Error,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "remote_server")]
#[command(about = "Demo control server: GET /test/get, POST /test/post/echo, GET /quit", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "REMOTE_SERVER_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(short, long, env = "REMOTE_SERVER_PORT", default_value_t = 8888)]
    port: u16,

    /// Worker limit, 0 for unbounded
    #[arg(long, env = "REMOTE_SERVER_MAX_CONNECTIONS", default_value_t = 0)]
    max_connections: usize,

    /// Used when RUST_LOG is not set
    #[arg(long, env = "REMOTE_SERVER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn route(request: &Request, quit: &Notify) -> Result<Response, HandlerError> {
    info!(%request, "request");

    let response = match (request, request.path()) {
        (Request::Get(_), "/test/get") => Response::text(200, "success"),
        (Request::Get(_), "/quit") => {
            quit.notify_one();
            Response::text(200, "bye")
        }
        (Request::Post(_, content), "/test/post/echo")
            if content.content_type() == &ContentType::Text =>
        {
            Response::text(
                200,
                format!("echo: {}", String::from_utf8_lossy(content.body())),
            )
        }
        (Request::Post(..), "/test/post/parameter") => match request.query("foo") {
            Some(foo) => Response::text(200, format!("foo: {foo}")),
            None => Response::text(400, "missing parameter foo"),
        },
        _ => Response::text(400, "unknown command"),
    };

    info!(%response, "response");
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let quit = Arc::new(Notify::new());
    let manager = ServerManager::new();

    let server = Server::builder()
        .address(SocketAddr::new(args.host, args.port))
        .handler({
            let quit = quit.clone();
            move |request: &Request| -> Result<Response, HandlerError> { route(request, &quit) }
        })
        .server_limits(ServerLimits {
            max_connections: args.max_connections,
            ..ServerLimits::default()
        })
        .build();

    let address = manager.start(server).await?;
    info!(%address, "listening, GET /quit or Ctrl-C to stop");

    tokio::select! {
        _ = quit.notified() => info!("quit requested"),
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("interrupted"),
            Err(err) => warn!(error = %err, "failed to listen for Ctrl-C"),
        },
    }

    manager.stop_all().await;
    Ok(())
}

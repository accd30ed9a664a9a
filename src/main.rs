use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use reflectsrv::http::{HttpConfig, HttpEchoServer, Router};
use reflectsrv::ReflectHandler;
use tracing::info;

/// HTTP echo server that answers every request with a JSON description of it
#[derive(Parser, Debug)]
#[command(name = "reflectsrv", version, about)]
struct Cli {
    /// TCP port to listen on
    #[arg(default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("reflectsrv=info")
        .init();

    let cli = Cli::parse();

    let config = HttpConfig::with_port(cli.port);
    let router = Router::new().route("/", ReflectHandler);
    let server = HttpEchoServer::new(config.clone(), router);

    let listener = server
        .bind()
        .await
        .wrap_err_with(|| format!("Failed to listen on port {}", cli.port))?;

    println!("Echo server running on http://localhost:{}", cli.port);
    info!(address = %config.bind_addr, "Starting HTTP echo server");

    server
        .serve(listener)
        .await
        .wrap_err("Failed to run HTTP echo server")?;

    Ok(())
}

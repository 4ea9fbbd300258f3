use diddit_server::{server, storage};
mod cli;

use std::io::BufRead;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    use clap::Parser;
    let args = cli::Cli::parse();
    if let Some(cli::Command::HashPassword { password, cost }) = args.command {
        std::process::exit(hash_password(password, cost));
    }

    // Console-only logging with env-driven level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(true)
        .init();

    let mut config = match server::AppConfig::load_with(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error=%e, "Failed to load config");
            std::process::exit(2);
        }
    };
    if let Some(port) = args.port {
        config.listen_port = port;
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    // Ensure data dir exists when using a relative default
    let db_path = config.db_path.clone();
    if let Some(parent) = std::path::Path::new(&db_path).parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        tracing::warn!(error=%e, dir=%parent.display(), "Failed to create data dir");
    }
    let store = match storage::Store::connect_sqlite(&db_path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error=%e, path=%db_path, "Failed to connect DB");
            std::process::exit(3);
        }
    };

    // Sessions idle past the cutoff can never be used again
    let cutoff = chrono::Utc::now() - chrono::Duration::days(config.auth.session_idle_days);
    match store.purge_sessions_before(cutoff.naive_utc()).await {
        Ok(n) if n > 0 => tracing::info!(purged = n, "Removed stale sessions"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error=%e, "Failed to purge stale sessions"),
    }

    let port = config.listen_port;
    let state = server::AppState::new(config, store);
    let shutdown_token = state.shutdown_token();
    let shutdown_token_for_server = shutdown_token.clone();

    let app = server::router(state);

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    tracing::info!(%addr, version = env!("CARGO_PKG_VERSION"), "Starting server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error=%e, %addr, "Failed to bind listener");
            std::process::exit(4);
        }
    };

    // Graceful shutdown on SIGINT/SIGTERM with a fallback timeout for stuck connections
    let mut server_task = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_token_for_server.cancelled_owned())
        .await
    });

    tokio::select! {
        _ = shutdown_signal() => {}
        res = &mut server_task => {
            match res {
                Ok(Ok(())) => tracing::warn!("server stopped unexpectedly"),
                Ok(Err(err)) => tracing::error!(%err, "server error"),
                Err(e) => tracing::error!(error=%e, "server task join error"),
            }
            std::process::exit(1);
        }
    }
    tracing::info!("shutdown: initiating graceful stop");
    shutdown_token.cancel();
    match tokio::time::timeout(std::time::Duration::from_secs(3), &mut server_task).await {
        Ok(join_res) => match join_res {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(%err, "server error"),
            Err(e) => tracing::error!(error=%e, "server task join error"),
        },
        Err(_) => {
            tracing::warn!("shutdown: forcing server abort due to timeout");
            server_task.abort();
        }
    }
}

fn hash_password(password: Option<String>, cost: u32) -> i32 {
    let password = match password {
        Some(p) => p,
        None => {
            let mut line = String::new();
            if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
                eprintln!("Failed to read password: {e}");
                return 2;
            }
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        eprintln!("Password must not be empty");
        return 2;
    }
    match bcrypt::hash(password, cost) {
        Ok(h) => {
            println!("{h}");
            0
        }
        Err(e) => {
            eprintln!("Hash error: {e}");
            2
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let (mut sigint, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(i), Ok(t)) => (i, t),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error=%e, "failed to install signal handlers; falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("shutdown: received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("shutdown: received SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown: received Ctrl+C");
    }
}

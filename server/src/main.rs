mod command;
mod config;
mod session;

use callcenter_shared::CallRouter;
use clap::Parser;
use command::{CommandDispatcher, DispatcherInput, TokioTimer};
use config::{Args, ServerConfig};
use session::{ClientSession, SessionManager};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Requests buffered between connection tasks and the dispatcher
const DISPATCH_QUEUE: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ServerConfig::try_from(Args::parse())?;

    let (timer, expiries) = TokioTimer::new();
    let router = CallRouter::new(&config.router, timer)?;
    info!(
        "Operators {:?}, ring timeout {:?}",
        config.router.operators, config.router.ring_timeout
    );

    let sessions = Arc::new(SessionManager::new());
    let (input_tx, input_rx) = mpsc::channel::<DispatcherInput>(DISPATCH_QUEUE);
    let dispatcher = CommandDispatcher::new(router, sessions.clone());
    tokio::spawn(dispatcher.run(input_rx, expiries));

    let listener = TcpListener::bind(&config.bind).await?;
    info!("Call center server listening on {}", config.bind);

    loop {
        let (socket, addr) = listener.accept().await?;
        let session = ClientSession::new(sessions.next_session_id(), socket, addr);
        info!("Connection from: {} (session {})", addr, session.id());

        let sessions = sessions.clone();
        let input_tx = input_tx.clone();
        tokio::spawn(async move {
            handle_session(session, sessions, input_tx).await;
        });
    }
}

/// Forward requests from one client to the dispatcher until it disconnects
async fn handle_session(
    mut session: ClientSession,
    sessions: Arc<SessionManager>,
    input_tx: mpsc::Sender<DispatcherInput>,
) {
    let id = session.id();
    sessions.register(session.get_handle()).await;
    debug!("{} client(s) connected", sessions.count().await);

    while let Some(request) = session.recv().await {
        debug!("Session {} request: {} {}", id, request.command, request.id);
        if input_tx
            .send(DispatcherInput::Request { session: id, request })
            .await
            .is_err()
        {
            error!("Dispatcher closed, dropping session {}", id);
            break;
        }
    }

    sessions.unregister(id).await;
    let _ = input_tx.send(DispatcherInput::Disconnected { session: id }).await;
    info!(
        "Client disconnected: {} (session {}, connected for {:?})",
        session.addr(),
        id,
        session.handle.connected_at.elapsed()
    );
}

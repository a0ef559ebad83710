// LANtern terminal client: TCP transport, local history, one chat session at a time.

mod config;
mod console;
mod store;
mod transport;

use std::time::Duration;

use anyhow::Context;
use lantern_core::{Action, ConnectionManager, Event};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use console::{Command, Renderer};
use store::Store;
use transport::Transport;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut debug = false;
    let mut connect = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("lantern {}", VERSION);
                return Ok(());
            }
            "--debug" => debug = true,
            "--connect" => {
                connect = Some(args.next().context("--connect needs a peer id")?);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    init_tracing(debug);
    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg, connect))
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "lantern_cli=debug,lantern_core=debug"
    } else {
        "lantern_cli=info,lantern_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cfg: config::Config, connect: Option<String>) -> anyhow::Result<()> {
    let mut store = Store::open(&cfg.state_file)?;
    let mut core = ConnectionManager::new();
    core.restore_persisted(store.history(), store.dark_mode());
    core.handle(Event::SetNotificationsEnabled(cfg.notifications));

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let transport = match Transport::bind(&cfg.listen_addr, event_tx.clone()).await {
        Ok(t) => t,
        Err(e) => {
            // Let the core record the failure before giving up.
            core.handle(Event::IdentityFailed(e.to_string()));
            return Err(e).with_context(|| format!("binding {}", cfg.listen_addr));
        }
    };

    info!(identity = %transport.identity(), state_file = %cfg.state_file.display(), "ready");

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    tokio::spawn(console::read_commands(cmd_tx));

    let tick_tx = event_tx.clone();
    let tick = Duration::from_millis(cfg.tick_millis);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.tick().await;
        loop {
            interval.tick().await;
            if tick_tx.send(Event::Tick).is_err() {
                break;
            }
        }
    });

    if let Some(peer) = connect {
        let _ = event_tx.send(Event::Connect(peer));
    }

    let mut renderer = Renderer::new(&core);
    println!("{}", console::HELP);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let event = tokio::select! {
            Some(event) = event_rx.recv() => event,
            Some(command) = cmd_rx.recv() => match command {
                Command::Core(event) => event,
                Command::SendFile(path) => match console::load_file(&path).await {
                    Ok(event) => event,
                    Err(e) => {
                        println!("! cannot read {path}: {e}");
                        continue;
                    }
                },
                Command::History => {
                    renderer.print_history(&core);
                    continue;
                }
                Command::Status => {
                    renderer.print_status(&core);
                    continue;
                }
                Command::Help => {
                    println!("{}", console::HELP);
                    continue;
                }
                Command::Quit => break,
            },
            res = &mut shutdown => {
                if let Err(e) = res {
                    warn!(error = %e, "signal handler failed");
                }
                break;
            }
        };
        let actions = core.handle(event);
        perform(actions, &transport, &mut store).await;
        renderer.render(&core);
    }

    info!("shutting down");
    let actions = core.shutdown();
    perform(actions, &transport, &mut store).await;
    transport.shutdown().await;
    Ok(())
}

async fn perform(actions: Vec<Action>, transport: &Transport, store: &mut Store) {
    for action in actions {
        match action {
            Action::OpenSession { session, remote } => transport.open(session, remote).await,
            Action::CloseSession(session) => transport.close(session).await,
            Action::Send { session, message } => transport.send(session, message).await,
            Action::PersistHistory(history) => {
                if let Err(e) = store.set_history(&history) {
                    warn!(error = %e, "failed to persist history");
                }
            }
            Action::PersistDarkMode(enabled) => {
                if let Err(e) = store.set_dark_mode(enabled) {
                    warn!(error = %e, "failed to persist dark mode");
                }
            }
            Action::Chime => print!("\x07"),
            Action::Alert { title, body } => eprintln!("{}", console::alert_line(&title, &body)),
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

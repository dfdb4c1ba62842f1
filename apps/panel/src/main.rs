use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    ControllerError, FileSessionStore, MemorySessionStore, SessionController, SessionStore,
    StatusClient,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod render;

use commands::PanelCommand;

#[derive(Parser, Debug)]
#[command(name = "fire-panel", about = "Operator console for the fire alarm backend")]
struct Args {
    /// TOML settings file. Defaults to ./fire_panel.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Base URL of the backend API, e.g. http://localhost:5000/api
    #[arg(long)]
    api_url: Option<String>,
    /// Keep the session in memory only.
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(args.config.as_deref())?;
    if let Some(api_url) = args.api_url {
        settings.api_base_url = api_url;
    }

    let client = StatusClient::new(
        &settings.api_base_url,
        settings.endpoints.clone(),
        settings.request_timeout(),
    )
    .with_context(|| format!("invalid api url '{}'", settings.api_base_url))?;
    info!(api = %client.base_url(), "backend configured");

    let store: Arc<dyn SessionStore> = if args.ephemeral {
        Arc::new(MemorySessionStore::new())
    } else {
        let path = settings.session_file_path()?;
        info!(path = %path.display(), "session file");
        Arc::new(FileSessionStore::new(path))
    };

    let controller = SessionController::new(
        Arc::new(client),
        store,
        settings.controller_settings(),
    );
    let printer = tokio::spawn(render::run(controller.subscribe_events()));

    controller.start().await;
    println!("{}", commands::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match commands::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };

        match command {
            PanelCommand::Login { username, password } => {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    report(controller.login(&username, &password).await);
                });
            }
            PanelCommand::Trigger { source } => {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    report(controller.trigger_protocol(&source).await);
                });
            }
            PanelCommand::Reset => {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    report(controller.reset_system().await);
                });
            }
            PanelCommand::Logout => report(controller.logout().await),
            PanelCommand::Status => {
                let status = controller.last_status().await;
                let who = match controller.session().await {
                    Some(session) => session.username,
                    None => "nobody".to_string(),
                };
                println!("{} (signed in: {who})", render::status_line(&status));
            }
            PanelCommand::Refresh => {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    report(controller.refresh_now().await);
                });
            }
            PanelCommand::Log => render::print_activity(&controller.activity().await),
            PanelCommand::Help => println!("{}", commands::HELP),
            PanelCommand::Quit => break,
        }
    }

    printer.abort();
    Ok(())
}

fn report(result: Result<(), ControllerError>) {
    if let Err(err) = result {
        println!("{err}");
    }
}

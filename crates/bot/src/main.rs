mod app;
mod catalog;
mod console;
mod settings;
mod users;

use std::ops::ControlFlow;
use std::path::PathBuf;

use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use app::{App, AppResult, ReadInputSnafu};
use console::ConsoleCommand;
use settings::SettingsStore;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(SettingsStore::default_config_path);
    let (settings, load_error) = match SettingsStore::open(config_path.clone()) {
        Ok(settings) => (settings, None),
        Err(error) => (SettingsStore::with_defaults(config_path), Some(error)),
    };

    init_tracing(&settings.settings().log_filter);
    if let Some(error) = load_error {
        tracing::warn!(error = %error, "failed to parse settings, using defaults");
    }
    match settings.seed_if_missing() {
        Ok(true) => tracing::info!(path = ?settings.config_path(), "wrote default settings"),
        Ok(false) => tracing::info!(path = ?settings.config_path(), "settings ready"),
        Err(error) => tracing::warn!(error = %error, "could not write default settings"),
    }

    if let Err(error) = run(settings).await {
        tracing::error!(error = %error, "carousel stopped with an error");
        std::process::exit(1);
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(settings: SettingsStore) -> AppResult<()> {
    let mut app = App::bootstrap(settings).await?;
    tracing::info!(
        "ready: `<user> <prev|next|play|stop> [message]`, `show <user> [message]`, `lang <user> <code>`, `delete <chat> <message>`, `reload`, `quit`"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let outcome = loop {
        let line = match lines.next_line().await.context(ReadInputSnafu {
            stage: "run-read-line",
        }) {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(error) => break Err(error),
        };

        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(error) => {
                tracing::warn!(line = %line.trim(), error = %error, "ignoring console line");
                continue;
            }
        };

        match app.handle(command).await {
            Ok(ControlFlow::Continue(())) => {}
            Ok(ControlFlow::Break(())) => break Ok(()),
            Err(error) => tracing::warn!(error = %error, "command failed"),
        }
    };

    let stopped = app.shutdown().await;
    tracing::info!(stopped, "carousel shut down");
    outcome
}

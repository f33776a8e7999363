//! Weavy widget driver.
//!
//! Runs the widget core headless, either against a live Weavy server or
//! against an in-process simulation of a page with two tabs.
//!
//! ## Usage
//!
//! ```bash
//! weavy-widget --url https://acme.weavy.io whoami
//! weavy-widget --url https://acme.weavy.io sign-in --jwt eyJhbGciOi...
//! weavy-widget sign-out
//! weavy-widget demo
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use weavy_client::events::drain;
use weavy_client::testing::{MemoryStorage, MockBubbleApi, MockIdentityApi, RecordingFrameHost};
use weavy_client::{
    FileStorage, FrameHost, FrameMesh, HttpTransport, JwtProvider, RealtimeHub, Storage, Widget,
    WidgetConfig, WidgetDeps, normalize_url,
};
use weavy_types::{Bubble, BubbleId, BubbleKind, PanelId, SpaceId, User};

#[derive(Parser, Debug)]
#[command(name = "weavy-widget")]
#[command(about = "Drive the Weavy widget core from the command line")]
struct Args {
    /// RON config file (default: <config_dir>/weavy/widget.ron if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Weavy base URL, overrides the config file
    #[arg(long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show who the server thinks we are
    Whoami,
    /// Sign in with a JWT
    SignIn {
        #[arg(long)]
        jwt: String,
    },
    /// Sign out
    SignOut,
    /// Run two simulated tabs against in-memory services
    Demo,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    match args.command {
        Command::Whoami => {
            let widget = live_widget(config)?;
            let user = widget.start().await;
            print_user(&user)?;
            println!("{} bubble(s)", widget.bubbles().len());
        }
        Command::SignIn { jwt } => {
            let widget = live_widget(config)?;
            widget.start().await;
            let user = widget.sign_in(JwtProvider::token(jwt)).await?;
            print_user(&user)?;
        }
        Command::SignOut => {
            let widget = live_widget(config)?;
            let user = widget.session().sign_out(true).await;
            print_user(&user)?;
        }
        Command::Demo => demo(config).await?,
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<WidgetConfig> {
    let mut config = match &args.config {
        Some(path) => WidgetConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => match WidgetConfig::default_path().filter(|p| p.exists()) {
            Some(path) => WidgetConfig::load(&path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => WidgetConfig::default(),
        },
    };
    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

fn live_widget(config: WidgetConfig) -> Result<Widget> {
    let http = Arc::new(HttpTransport::new(&config)?);
    let storage: Arc<dyn Storage> = match FileStorage::default_path() {
        Some(path) => Arc::new(FileStorage::new(path)),
        None => Arc::new(MemoryStorage::new()),
    };
    let frame = FrameMesh::default().open_window("cli", &normalize_url(&config.url));
    let deps = WidgetDeps {
        bus: Arc::new(frame),
        identity: http.clone(),
        bubbles: http,
        frames: Arc::new(HeadlessFrameHost),
        storage,
    };
    Ok(Widget::new(config, deps))
}

/// There is no browser behind the CLI: frames exist in name only and every
/// load succeeds at once.
struct HeadlessFrameHost;

#[async_trait]
impl FrameHost for HeadlessFrameHost {
    fn create_frame(&self, frame_name: &str, panel_id: &PanelId) {
        tracing::debug!(frame = frame_name, panel = %panel_id, "frame created");
    }

    async fn when_idle(&self) {}

    async fn load(&self, frame_name: &str, url: &str) -> Result<(), String> {
        tracing::debug!(frame = frame_name, url, "frame loaded");
        Ok(())
    }

    fn destroy_frame(&self, frame_name: &str) {
        tracing::debug!(frame = frame_name, "frame destroyed");
    }
}

fn print_user(user: &User) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(user)?);
    Ok(())
}

// ============================================================================
// Demo
// ============================================================================

const DEMO_ORIGIN: &str = "https://demo.weavy.io";

async fn demo(config: WidgetConfig) -> Result<()> {
    let mesh = FrameMesh::default();
    let identity = Arc::new(
        MockIdentityApi::new(User::with_id(1).named("Demo User")).with_delay(Duration::from_millis(50)),
    );
    let bubbles = Arc::new(MockBubbleApi::new(vec![
        Bubble::new(SpaceId(1), BubbleId(10), BubbleKind::Global).with_name("Project").with_url("/e/spaces/1"),
        Bubble::new(SpaceId(2), BubbleId(20), BubbleKind::Personal).with_name("Alice").with_url("/e/spaces/2"),
    ]));

    let tab = |name: &str| {
        let deps = WidgetDeps {
            bus: Arc::new(mesh.open_window(name, DEMO_ORIGIN)),
            identity: identity.clone(),
            bubbles: bubbles.clone(),
            frames: Arc::new(RecordingFrameHost::new().with_load_time(Duration::from_millis(100))),
            storage: Arc::new(MemoryStorage::new()),
        };
        Widget::new(config.clone(), deps)
    };
    let first = tab("tab-1");
    let second = tab("tab-2");
    let mut log = first.events().subscribe();

    let (a, b) = tokio::join!(first.start(), second.start());
    println!("tab-1 user {:?}, tab-2 user {:?}", a.id, b.id);
    println!("identity checks: {} (leader: {:?})", identity.fetch_calls(), mesh.leader_of(DEMO_ORIGIN));

    first.open_bubble(SpaceId(1)).await?;
    println!("opened bubble 1, open panel: {:?}", first.panels().open_panel());

    let hub = RealtimeHub::new();
    let realtime = hub.subscribe();
    hub.publish_raw("bubble-removed.weavy", serde_json::json!({ "spaceId": 1, "bubbleId": 10 }))?;
    hub.publish_raw(
        "bubble-added.weavy",
        serde_json::json!({ "spaceId": 3, "bubbleId": 30, "name": "Design", "url": "/e/spaces/3" }),
    )?;
    hub.publish_raw("message-inserted.weavy", serde_json::json!({ "id": 5, "conversation": 2, "createdBy": 9 }))?;
    drop(hub);
    first.run(realtime).await;

    for button in first.dock().buttons() {
        println!("  button {} [{:?}] open={}", button.id, button.container, button.is_open);
    }

    first.close().await;
    println!("after close: {} bubble(s), {} button(s)", first.bubbles().len(), first.dock().buttons().len());

    let names: Vec<&str> = drain(&mut log).iter().map(|e| e.name()).collect();
    println!("tab-1 events: {}", names.join(", "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_headless_host_loads_immediately() {
        let host = HeadlessFrameHost;
        host.create_frame("panel-x", &PanelId::new("x").unwrap());
        host.when_idle().await;
        assert_eq!(host.load("panel-x", "/x").await, Ok(()));
        host.destroy_frame("panel-x");
    }
}

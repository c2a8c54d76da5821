use clap::Parser;
use eframe::egui;

use tree_loom::api::rosbridge;
use tree_loom::api::{OfflineClient, RuntimeClient};
use tree_loom::gui::frontend::EditorApp;
use tree_loom::persistence::settings::AppSettings;

#[derive(Parser, Debug)]
#[command(name = "Tree-Loom", version, about = "Behavior tree editor for a remote runtime")]
struct Cli {
    /// rosbridge websocket, overrides the settings file
    #[arg(long)]
    bridge_url: Option<String>,
    /// Runtime namespace, e.g. /tree_node/
    #[arg(long)]
    namespace: Option<String>,
    /// Start without connecting to the runtime
    #[arg(long, default_value_t = false)]
    offline: bool,
}

fn connect(settings: &AppSettings, offline: bool) -> Box<dyn RuntimeClient> {
    if offline {
        log::info!("starting offline");
        return Box::new(OfflineClient::default());
    }
    match rosbridge::connect(&settings.bridge_url, &settings.namespace) {
        Ok(client) => Box::new(client),
        Err(e) => {
            log::error!("could not reach {}: {:#}", settings.bridge_url, e);
            Box::new(OfflineClient::default())
        }
    }
}

fn main() -> eframe::Result {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings = AppSettings::load_or_default();
    if let Some(url) = cli.bridge_url {
        settings.bridge_url = url;
    }
    if let Some(ns) = cli.namespace {
        settings.namespace = ns;
    }
    let client = connect(&settings, cli.offline);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1300.0, 760.0])
            // Provide sensible bounds so the UI stays usable on small screens
            .with_min_inner_size([700.0, 420.0])
            .with_resizable(true),
        ..Default::default()
    };
    eframe::run_native(
        "Tree-Loom",
        options,
        Box::new(move |_cc| Ok(Box::new(EditorApp::new(settings, client)) as Box<dyn eframe::App>)),
    )
}

use std::sync::Arc;

use tokio::signal;
use tokio::sync::mpsc;

use zvonilka::audio::{AudioPipeline, DeviceEnumerator, DeviceRegistry};
use zvonilka::config::Config;
use zvonilka::gui_bridge::{GuiBridge, GuiEvent};
use zvonilka::protocol::{self, GuiMessage};
use zvonilka::{ConfigurationSession, PreferenceStore, TomlFileMedium};

#[cfg(feature = "alsa-backend")]
fn platform_audio(config: &Config) -> (Box<dyn DeviceEnumerator>, Box<dyn AudioPipeline>) {
    use zvonilka::audio::{AlsaEnumerator, AlsaPipeline};
    (
        Box::new(AlsaEnumerator),
        Box::new(AlsaPipeline::new(config.sample_rate, config.channels, config.period_size)),
    )
}

// Without hardware support only the configured default devices are offered.
#[cfg(not(feature = "alsa-backend"))]
fn platform_audio(config: &Config) -> (Box<dyn DeviceEnumerator>, Box<dyn AudioPipeline>) {
    use zvonilka::audio::{NullPipeline, StaticEnumerator};
    (
        Box::new(StaticEnumerator::new([config.capture_device], [config.playback_device])),
        Box::new(NullPipeline),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::new().unwrap_or_default();
    let settings_path = config.settings_path();
    log::info!("{} {} using settings at {}", config.app_name, config.app_version, settings_path.display());

    let (enumerator, pipeline) = platform_audio(&config);
    let store = PreferenceStore::new(Box::new(TomlFileMedium::new(settings_path)));
    let mut session = ConfigurationSession::new(DeviceRegistry::new(enumerator), pipeline, store);
    let mut rx_changes = session.subscribe();

    // Enumeration and the first file read touch hardware and disk.
    let outcome = tokio::task::block_in_place(|| session.load());
    for issue in &outcome.issues {
        log::warn!("Restore: {}", issue);
    }

    let (tx_gui_event, mut rx_gui_event) = mpsc::channel::<GuiEvent>(100);
    let gui_bridge = Arc::new(GuiBridge::new(&config, tx_gui_event).await?);
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge_clone.run().await {
            log::error!("GuiBridge error: {}", e);
        }
    });

    for msg in [GuiMessage::devices(&outcome.snapshot), GuiMessage::snapshot(&session)] {
        if let Err(e) = gui_bridge.send(&msg).await {
            log::warn!("Failed to send to GUI: {}", e);
        }
    }

    log::info!("Settings core started");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(event) = rx_gui_event.recv() => {
                match event {
                    GuiEvent::Command(cmd) => {
                        log::debug!("GUI command: {:?}", cmd);
                        let replies = tokio::task::block_in_place(|| protocol::dispatch(&mut session, cmd));
                        for reply in replies {
                            if let Err(e) = gui_bridge.send(&reply).await {
                                log::warn!("Failed to send to GUI: {}", e);
                            }
                        }
                    }
                }
            }

            Some(change) = rx_changes.recv() => {
                if let Err(e) = gui_bridge.send(&GuiMessage::Changed(change)).await {
                    log::warn!("Failed to send to GUI: {}", e);
                }
            }
        }
    }

    if session.has_unsaved_changes() {
        if let Err(e) = session.save() {
            log::error!("Settings not saved on exit: {}", e);
        }
    }
    Ok(())
}

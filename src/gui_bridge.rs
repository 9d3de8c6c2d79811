use crate::config::Config;
use crate::protocol::{GuiCommand, GuiMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

pub enum GuiEvent {
    Command(GuiCommand),
}

pub struct GuiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    buffer_size: usize,
    tx: mpsc::Sender<GuiEvent>,
}

// The settings window runs as its own process and talks to the core over
// local UDP; ports come from config.toml.
impl GuiBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<GuiEvent>) -> anyhow::Result<Self> {
        Self::bind(
            &format!("{}:{}", config.gui_local_ip, config.gui_local_port),
            format!("{}:{}", config.gui_remote_ip, config.gui_remote_port),
            config.gui_buffer_size,
            tx,
        )
        .await
    }

    pub async fn bind(
        local_addr: &str,
        target_addr: String,
        buffer_size: usize,
        tx: mpsc::Sender<GuiEvent>,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        log::info!("GUI bridge listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            buffer_size,
            tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                log::warn!("Dropping non-UTF-8 datagram from {}", peer);
                continue;
            };
            match GuiCommand::parse(text) {
                Ok(cmd) => {
                    if let Err(e) = self.tx.send(GuiEvent::Command(cmd)).await {
                        log::error!("Failed to send GUI event: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("{}: {}", e, text);
                    if let Err(e) = self.send(&GuiMessage::error(&e)).await {
                        log::warn!("Failed to send to GUI: {}", e);
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn send(&self, msg: &GuiMessage) -> anyhow::Result<()> {
        let json = msg.to_json()?;
        self.socket.send_to(json.as_bytes(), &self.target_addr).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Field;
    use std::time::Duration;

    async fn gui_peer() -> (UdpSocket, GuiBridge, mpsc::Receiver<GuiEvent>) {
        let gui = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = mpsc::channel(8);
        let bridge = GuiBridge::bind("127.0.0.1:0", gui.local_addr().unwrap().to_string(), 4096, tx)
            .await
            .unwrap();
        (gui, bridge, rx)
    }

    #[tokio::test]
    async fn inbound_datagram_becomes_command() {
        let (gui, bridge, mut rx) = gui_peer().await;
        let bridge = Arc::new(bridge);
        let addr = bridge.local_addr().unwrap();
        let runner = bridge.clone();
        tokio::spawn(async move { runner.run().await });

        gui.send_to(br#"{"type":"set","field":"output_volume","value":25}"#, addr)
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let GuiEvent::Command(GuiCommand::Set { field, value }) = event else {
            panic!("expected a set command");
        };
        assert_eq!(field, Field::OutputVolume);
        assert_eq!(value, serde_json::json!(25));
    }

    #[tokio::test]
    async fn malformed_datagram_is_answered_with_error() {
        let (gui, bridge, _rx) = gui_peer().await;
        let bridge = Arc::new(bridge);
        let addr = bridge.local_addr().unwrap();
        let runner = bridge.clone();
        tokio::spawn(async move { runner.run().await });

        gui.send_to(b"{not json", addr).await.unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), gui.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(reply["type"], "error");
    }

    #[tokio::test]
    async fn outbound_message_reaches_gui() {
        let (gui, bridge, _rx) = gui_peer().await;

        bridge.send(&GuiMessage::error("boom")).await.unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), gui.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], br#"{"type":"error","message":"boom"}"#);
    }
}

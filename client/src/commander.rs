//! Command push to the broker, which routes to exactly one named UAV.

use anyhow::{Context, Result};
use zeromq::{PushSocket, Socket, SocketSend, ZmqMessage};

use tb_wire::{CommandFrame, UiTag, CAMERA_UI_TAG, MAPPING_UI_TAG};

pub struct Commander {
    socket: PushSocket,
}

impl Commander {
    pub async fn connect(host: &str, command_port: u16) -> Result<Commander> {
        let mut socket = PushSocket::new();
        let addr = format!("tcp://{host}:{command_port}");
        socket
            .connect(&addr)
            .await
            .with_context(|| format!("connect commander to {addr}"))?;
        Ok(Commander { socket })
    }

    /// Send `body` to the UAV named `target`.
    pub async fn send(&mut self, target: &str, body: &str) -> Result<()> {
        let wire = CommandFrame::encode(target, body);
        self.socket
            .send(ZmqMessage::from(wire))
            .await
            .context("push command")?;
        Ok(())
    }

    /// Same as [`Commander::send`] but with the UI marker embedded so the
    /// broker log attributes the command.
    pub async fn send_tagged(&mut self, target: &str, tag: UiTag, body: &str) -> Result<()> {
        let body = match tag {
            UiTag::Camera => format!("{CAMERA_UI_TAG} {body}"),
            UiTag::Mapping => format!("{MAPPING_UI_TAG} {body}"),
            UiTag::Unknown => body.to_owned(),
        };
        self.send(target, &body).await
    }
}

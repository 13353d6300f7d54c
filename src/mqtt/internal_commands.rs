
use log::info;
use tokio::sync::mpsc::Sender;
use crate::mqtt::{SubscribeData, Transmission};

pub struct CommandHandler {
   sender: Sender<Transmission>,
}

impl CommandHandler {

  pub fn new(sender: Sender<Transmission>) -> Self {
    return CommandHandler {
      sender: sender,
    }
  }

  pub async fn start_thread(&self) {
        info!("Starting CommandHandler thread");
        /* We need to subscribe to an MQTT topic and wait for data to fill our buffers */
        let (sender, mut receiver) = tokio::sync::mpsc::channel(10);

        let register = Transmission::Subscribe(SubscribeData{
            topic: "mgt/command".to_string(),
            sender
        });

        let _ = self.sender.send(register).await;

        info!("Start waiting for command messages");
        while let Some(c) = receiver.recv().await {
            info!("Received command {c}");

            if c == "restart" {
                /* if we exit that thread the rest will exit, too */
                info!("Request to shutdown received");
                return;
            }
        }
  }
}

//! Channel aliases and constructors

use tokio::sync::{broadcast, mpsc};

use crate::channel::communication::{AppEvent, Command};
use crate::config::ChannelConfig;

pub type CommandSender = mpsc::Sender<Command>;
pub type CommandReceiver = mpsc::Receiver<Command>;
pub type AppEventSender = broadcast::Sender<AppEvent>;
pub type AppEventReceiver = broadcast::Receiver<AppEvent>;

/// Create the bounded command channel (handles → core loop)
pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    mpsc::channel(config.command_buffer_size.max(1))
}

/// Create the event broadcast (core loop → any number of subscribers)
pub fn create_app_event_channel(config: &ChannelConfig) -> (AppEventSender, AppEventReceiver) {
    broadcast::channel(config.app_event_buffer_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SessionStatus;

    #[tokio::test]
    async fn test_every_subscriber_sees_events() {
        let (tx, mut first) = create_app_event_channel(&ChannelConfig::testing());
        let mut second = tx.subscribe();

        tx.send(AppEvent::Status {
            status: SessionStatus::Online,
        })
        .unwrap();

        assert_eq!(first.recv().await.unwrap().kind(), "status");
        assert_eq!(second.recv().await.unwrap().kind(), "status");
    }
}

//! Commands received as messages in the operator chat.

use snipe_session::PushHandler;
use snipe_wire::{Message, PushEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::console::Command;
use crate::component_warn;

/// Forwards operator chat messages to the console task
pub struct ChatCommandHandler {
    operator_chat_id: i64,
    commands: mpsc::UnboundedSender<Command>,
    race_interval: Duration,
}

impl ChatCommandHandler {
    pub fn new(operator_chat_id: i64, commands: mpsc::UnboundedSender<Command>, race_interval: Duration) -> Self {
        Self {
            operator_chat_id,
            commands,
            race_interval,
        }
    }

    fn command_for(&self, message: &Message) -> Option<Command> {
        // Private messages only: the chat id equals the sending user's id.
        // Own messages count, so the account can be driven from another device.
        if message.chat_id != self.operator_chat_id || message.sender_user_id() != Some(message.chat_id) {
            return None;
        }
        match message.text()?.trim() {
            "check" => Some(Command::Test),
            "upg" => Some(Command::Upg {
                interval: self.race_interval,
            }),
            "stop" => Some(Command::Stop),
            other => {
                debug!("Ignoring operator message {:?}", other);
                None
            }
        }
    }
}

impl PushHandler for ChatCommandHandler {
    fn on_push(&self, event: &PushEvent) {
        let PushEvent::NewMessage(message) = event else {
            return;
        };
        if let Some(command) = self.command_for(message) {
            if self.commands.send(command).is_err() {
                component_warn!("chat", "Console is gone, dropping chat command");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipe_wire::{FormattedText, MessageContent, MessageSender};

    fn message(chat_id: i64, sender: MessageSender, is_outgoing: bool, text: &str) -> PushEvent {
        PushEvent::NewMessage(Message {
            id: 1,
            chat_id,
            sender_id: Some(sender),
            is_outgoing,
            content: Some(MessageContent::MessageText {
                text: FormattedText { text: text.to_string() },
            }),
        })
    }

    fn user(user_id: i64) -> MessageSender {
        MessageSender::MessageSenderUser { user_id }
    }

    #[test]
    fn test_operator_commands_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = ChatCommandHandler::new(42, tx, Duration::from_millis(25));

        handler.on_push(&message(42, user(42), false, "check"));
        handler.on_push(&message(42, user(42), false, " upg "));
        handler.on_push(&message(42, user(42), true, "stop"));

        assert_eq!(rx.try_recv().unwrap(), Command::Test);
        assert_eq!(
            rx.try_recv().unwrap(),
            Command::Upg {
                interval: Duration::from_millis(25)
            }
        );
        assert_eq!(rx.try_recv().unwrap(), Command::Stop);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_non_private_and_foreign_messages_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = ChatCommandHandler::new(42, tx, Duration::from_millis(25));

        // Another private chat, own or not
        handler.on_push(&message(7, user(7), false, "stop"));
        handler.on_push(&message(7, user(42), true, "stop"));
        // Operator chat id, but not a private message from that user
        handler.on_push(&message(42, user(9), false, "stop"));
        handler.on_push(&message(42, MessageSender::MessageSenderChat { chat_id: 42 }, false, "stop"));
        handler.on_push(&message(42, user(42), false, "hello"));
        handler.on_push(&PushEvent::Other("updateUser"));

        assert!(rx.try_recv().is_err());
    }
}

mod command;
mod error;
mod model;

pub use command::Command;
pub use error::{Error, Result};
pub use model::{AccountInfo, EndPoint, MessageRecord, NotLeaderInfo, Page};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_bytes() {
        let cmd = Command::SendMessage {
            sender: "alice".to_string(),
            recipient: "bob".to_string(),
            content: "hi".to_string(),
            timestamp: chrono::Utc::now(),
        };

        let bytes = cmd.to_bytes().unwrap();
        let decoded = Command::from_bytes(&bytes).unwrap();

        match decoded {
            Command::SendMessage {
                sender, recipient, ..
            } => {
                assert_eq!(sender, "alice");
                assert_eq!(recipient, "bob");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn endpoint_parses_host_port() {
        let ep: EndPoint = "127.0.0.1:5001".parse().unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 5001);
        assert_eq!(ep.to_string(), "127.0.0.1:5001");
    }

    #[test]
    fn endpoint_rejects_missing_port() {
        assert!("localhost".parse::<EndPoint>().is_err());
    }
}

//! Operator link over stdio
//!
//! One JSON object per line in both directions. A dedicated thread reads
//! stdin so the main loop can `select!` over commands, the telemetry tick and
//! Ctrl+C.

use crossbeam_channel::{Receiver, bounded};
use serde_json::{Value, json};
use siana_control::{CommandRequest, CommandResult, RobotTelemetry};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Line read from the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Command(CommandRequest),
    /// Not a command object; carries the parse error
    Invalid(String),
}

pub fn parse_line(line: &str) -> Inbound {
    match serde_json::from_str::<CommandRequest>(line) {
        Ok(request) => Inbound::Command(request),
        Err(e) => Inbound::Invalid(e.to_string()),
    }
}

/// Spawn the reader thread. The channel disconnects at end of input.
pub fn spawn_reader<R>(input: R) -> io::Result<Receiver<Inbound>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = bounded(32);
    thread::Builder::new().name("siana-stdin".to_string()).spawn(move || {
        for line in BufReader::new(input).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Operator link read failed: {}", e);
                    break;
                },
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            debug!("<- {}", line);
            if tx.send(parse_line(line)).is_err() {
                break;
            }
        }
    })?;
    Ok(rx)
}

/// JSON line writer for acks, telemetry and errors.
pub struct Outbound<W: Write> {
    writer: W,
}

impl<W: Write> Outbound<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn ack(&mut self, result: &CommandResult) -> io::Result<()> {
        let mut value = serde_json::to_value(result)?;
        if let Value::Object(map) = &mut value {
            map.insert("type".to_string(), Value::from("cmd_ack"));
        }
        self.write_line(&value)
    }

    pub fn telemetry(&mut self, telemetry: &RobotTelemetry) -> io::Result<()> {
        self.write_line(&json!({
            "type": "telemetry",
            "timestamp": unix_now(),
            "data": telemetry,
        }))
    }

    pub fn error(&mut self, message: &str) -> io::Result<()> {
        self.write_line(&json!({ "type": "error", "msg": message }))
    }

    fn write_line(&mut self, value: &Value) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, value)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.writer
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use siana_control::{Hardware, Robot, RobotState};
    use siana_tools::RobotConfig;
    use std::io::Cursor;

    fn lines(buffer: Vec<u8>) -> Vec<Value> {
        String::from_utf8(buffer)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line(r#"{"action":"set_speed","value":55}"#),
            Inbound::Command(CommandRequest::with_value("set_speed", 55.0))
        );
        assert!(matches!(parse_line("not json"), Inbound::Invalid(_)));
        assert!(matches!(parse_line(r#"{"value":3}"#), Inbound::Invalid(_)));
    }

    #[test]
    fn test_reader_skips_blank_lines_and_disconnects() {
        let input = Cursor::new("{\"action\":\"ping\"}\n\n   \n{oops\n");
        let rx = spawn_reader(input).unwrap();

        assert_eq!(rx.recv().unwrap(), Inbound::Command(CommandRequest::new("ping")));
        assert!(matches!(rx.recv().unwrap(), Inbound::Invalid(_)));
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_ack_and_error_lines() {
        let mut out = Outbound::new(Vec::new());
        let result = CommandResult {
            accepted: false,
            message: "Unknown command: 'dance'".to_string(),
            state: RobotState::Idle,
            speed: 60.0,
            extra: Default::default(),
        };
        out.ack(&result).unwrap();
        out.error("expected value").unwrap();

        let values = lines(out.into_inner());
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["type"], "cmd_ack");
        assert_eq!(values[0]["accepted"], false);
        assert_eq!(values[0]["state"], "IDLE");
        assert_eq!(values[1]["type"], "error");
        assert_eq!(values[1]["msg"], "expected value");
    }

    #[test]
    fn test_telemetry_line() {
        let robot = Robot::build(RobotConfig::default(), Hardware::simulated()).unwrap();
        let mut out = Outbound::new(Vec::new());
        out.telemetry(&robot.telemetry()).unwrap();

        let values = lines(out.into_inner());
        assert_eq!(values[0]["type"], "telemetry");
        assert!(values[0]["timestamp"].as_f64().unwrap() > 0.0);
        assert_eq!(values[0]["data"]["robot"]["state"], "IDLE");
        assert_eq!(values[0]["data"]["safety"]["estop"], false);
    }
}

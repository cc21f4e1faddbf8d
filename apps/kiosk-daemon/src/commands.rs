//! Line commands read from stdin.
//!
//! ```text
//! start <order_id> <amount_cents>
//! cancel
//! status
//! quit
//! ```

use thiserror::Error;

use kiosk_core::Money;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start { order_id: String, amount: Money },
    Cancel,
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid amount (cents expected): {0}")]
    InvalidAmount(String),
}

/// Parses one line. Blank lines and `#` comments yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    let command = match (verb.as_str(), args.as_slice()) {
        ("start", [order_id, amount]) => {
            let cents = amount
                .parse::<i64>()
                .map_err(|_| CommandError::InvalidAmount(amount.to_string()))?;
            Command::Start {
                order_id: order_id.to_string(),
                amount: Money::from_cents(cents),
            }
        }
        ("start", _) => return Err(CommandError::Usage("start <order_id> <amount_cents>")),
        ("cancel", []) => Command::Cancel,
        ("status", []) => Command::Status,
        ("quit" | "exit", []) => Command::Quit,
        ("cancel" | "status" | "quit" | "exit", _) => {
            return Err(CommandError::Usage("cancel | status | quit take no arguments"))
        }
        (other, _) => return Err(CommandError::Unknown(other.to_string())),
    };

    Ok(Some(command))
}

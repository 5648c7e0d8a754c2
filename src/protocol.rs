//! Wire framing and the command grammar
//!
//! Every message in either direction is a fixed-width ASCII decimal length
//! header, right-padded with spaces, followed by exactly that many bytes of
//! UTF-8 text. Inbound text is parsed into a typed [`Command`] here at the
//! boundary; the router never sees raw pipe-delimited strings.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::amount::Amount;
use crate::error::{NodeError, Result};
use crate::identity::HardwareInfo;

/// Width of the length header in bytes.
pub const HEADER_LEN: usize = 64;

/// Sentinel payload for a graceful disconnect.
pub const DISCONNECT_MESSAGE: &str = "!DISCONNECT";

/// Upper bound on a single message body.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Read one framed message. `Ok(None)` means the peer closed the connection
/// cleanly between frames; any malformed header is a protocol error and the
/// caller tears the session down.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let header_text = std::str::from_utf8(&header)
        .map_err(|_| NodeError::Protocol("Length header is not UTF-8".to_string()))?;
    let length: usize = header_text
        .trim()
        .parse()
        .map_err(|_| NodeError::Protocol(format!("Invalid length header: {:?}", header_text.trim())))?;
    if length > MAX_MESSAGE_SIZE {
        return Err(NodeError::Protocol(format!("Message too large: {} bytes", length)));
    }

    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| NodeError::Protocol(format!("Connection closed mid-message: {}", e)))?;
    let text = String::from_utf8(body)
        .map_err(|_| NodeError::Protocol("Message body is not UTF-8".to_string()))?;
    Ok(Some(text))
}

/// Write one framed message.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &str) -> Result<()> {
    let body = payload.as_bytes();
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(NodeError::Protocol(format!(
            "Outbound message too large: {} bytes",
            body.len()
        )));
    }
    let mut header = body.len().to_string().into_bytes();
    header.resize(HEADER_LEN, b' ');
    writer.write_all(&header).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetBalance { username: String },
    SendTransaction { from: String, to: String, amount: Amount },
    GetHistory { username: String },
    CheckUsername { username: String },
    Register {
        username: String,
        password: String,
        words: Vec<String>,
        hardware: Option<HardwareInfo>,
    },
    Login {
        username: String,
        password: String,
        words: Option<Vec<String>>,
        hardware: Option<HardwareInfo>,
    },
    Mine { username: String, seconds: u64 },
    AirDrop { username: String, amount: Amount },
    SubmitBlock { text: String, claimed_hash: String },
    /// Anything unrecognized; echoed back as an acknowledgement.
    Unknown { text: String },
}

/// A message that matched a keyword but not its argument shape. Carries the
/// exact failure text the client expects for that command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub response: String,
}

impl CommandError {
    fn new(response: &str) -> Self {
        CommandError { response: response.to_string() }
    }
}

fn parse_json_words(raw: &str) -> Option<Vec<String>> {
    serde_json::from_str(raw).ok()
}

fn parse_json_hardware(raw: &str) -> Option<HardwareInfo> {
    serde_json::from_str(raw).ok()
}

/// Parse one decoded message into a [`Command`].
pub fn parse_command(msg: &str) -> std::result::Result<Command, CommandError> {
    if let Some(rest) = msg.strip_prefix("GET_BALANCE|") {
        return Ok(Command::GetBalance { username: rest.trim().to_string() });
    }

    if let Some(rest) = msg.strip_prefix("SEND_TRANSACTION|") {
        let parts: Vec<&str> = rest.split('|').collect();
        if parts.len() < 3 {
            return Err(CommandError::new("TRANSACTION_FAILED: Invalid transaction data"));
        }
        let amount: Amount = parts[2]
            .parse()
            .map_err(|_| CommandError::new("TRANSACTION_FAILED: Invalid transaction data"))?;
        return Ok(Command::SendTransaction {
            from: parts[0].to_string(),
            to: parts[1].to_string(),
            amount,
        });
    }

    if let Some(rest) = msg.strip_prefix("GET_HISTORY|") {
        return Ok(Command::GetHistory { username: rest.trim().to_string() });
    }

    if let Some(rest) = msg.strip_prefix("CHECK_USERNAME|") {
        return Ok(Command::CheckUsername { username: rest.trim().to_string() });
    }

    if let Some(rest) = msg.strip_prefix("REGISTER|") {
        let parts: Vec<&str> = rest.split('|').collect();
        if parts.len() < 3 {
            return Err(CommandError::new("REGISTRATION_FAILED: Invalid registration data"));
        }
        let words = parse_json_words(parts[2])
            .ok_or_else(|| CommandError::new("REGISTRATION_FAILED: Invalid word list JSON"))?;
        // A malformed hardware payload degrades to "no hardware supplied"
        // rather than failing registration.
        let hardware = parts
            .get(3)
            .filter(|raw| !raw.trim().is_empty())
            .and_then(|raw| parse_json_hardware(raw));
        return Ok(Command::Register {
            username: parts[0].to_string(),
            password: parts[1].to_string(),
            words,
            hardware,
        });
    }

    if let Some(rest) = msg.strip_prefix("LOGIN|") {
        let parts: Vec<&str> = rest.split('|').collect();
        if parts.len() < 2 {
            return Err(CommandError::new("LOGIN_FAILED: Invalid login data"));
        }
        let words = parts
            .get(2)
            .filter(|raw| !raw.trim().is_empty())
            .and_then(|raw| parse_json_words(raw));
        let hardware = parts
            .get(3)
            .filter(|raw| !raw.trim().is_empty())
            .and_then(|raw| parse_json_hardware(raw));
        return Ok(Command::Login {
            username: parts[0].to_string(),
            password: parts[1].to_string(),
            words,
            hardware,
        });
    }

    if let Some(rest) = msg.strip_prefix("MINE|") {
        let parts: Vec<&str> = rest.split('|').collect();
        if parts.len() < 2 {
            return Err(CommandError::new("MINE_FAILED: Invalid mining data"));
        }
        let seconds: u64 = parts[1]
            .trim()
            .parse()
            .map_err(|_| CommandError::new("MINE_FAILED: Invalid mining data"))?;
        return Ok(Command::Mine { username: parts[0].to_string(), seconds });
    }

    if let Some(rest) = msg.strip_prefix("AIR_DROP|") {
        let parts: Vec<&str> = rest.split('|').collect();
        if parts.len() < 2 {
            return Err(CommandError::new("AIR_DROP_FAILED: Invalid airdrop data"));
        }
        let amount: Amount = parts[1]
            .parse()
            .map_err(|_| CommandError::new("AIR_DROP_FAILED: Invalid airdrop data"))?;
        return Ok(Command::AirDrop { username: parts[0].to_string(), amount });
    }

    if let Some((text, claimed_hash)) = msg.split_once("|||") {
        return Ok(Command::SubmitBlock {
            text: text.to_string(),
            claimed_hash: claimed_hash.trim().to_string(),
        });
    }

    Ok(Command::Unknown { text: msg.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, "GET_BALANCE|alice").await.unwrap();
        assert_eq!(buffer.len(), HEADER_LEN + "GET_BALANCE|alice".len());
        let header = std::str::from_utf8(&buffer[..HEADER_LEN]).unwrap();
        assert_eq!(header.trim_end(), "17");

        let mut cursor = std::io::Cursor::new(buffer);
        let msg = read_frame(&mut cursor).await.unwrap();
        assert_eq!(msg.as_deref(), Some("GET_BALANCE|alice"));
    }

    #[tokio::test]
    async fn test_clean_close_between_frames() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        assert_eq!(read_frame(&mut cursor).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_header_is_protocol_error() {
        let mut header = vec![b'x'; HEADER_LEN];
        header.extend_from_slice(b"body");
        let mut cursor = std::io::Cursor::new(header);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(NodeError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let mut header = (MAX_MESSAGE_SIZE + 1).to_string().into_bytes();
        header.resize(HEADER_LEN, b' ');
        let mut cursor = std::io::Cursor::new(header);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(NodeError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_transfer() {
        let cmd = parse_command("SEND_TRANSACTION|alice|bob|10").unwrap();
        assert_eq!(
            cmd,
            Command::SendTransaction {
                from: "alice".to_string(),
                to: "bob".to_string(),
                amount: Amount::from_coins(10),
            }
        );
    }

    #[test]
    fn test_parse_transfer_arity_error() {
        let err = parse_command("SEND_TRANSACTION|alice|bob").unwrap_err();
        assert_eq!(err.response, "TRANSACTION_FAILED: Invalid transaction data");
    }

    #[test]
    fn test_parse_register_with_hardware() {
        let msg = r#"REGISTER|alice|pw|["cat","dog"]|{"cpu_id":"c","ram_id":"r","disk_serial":"d"}"#;
        match parse_command(msg).unwrap() {
            Command::Register { username, words, hardware, .. } => {
                assert_eq!(username, "alice");
                assert_eq!(words, vec!["cat".to_string(), "dog".to_string()]);
                assert_eq!(hardware.unwrap().cpu_id, "c");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_register_bad_word_json_fails() {
        let err = parse_command("REGISTER|alice|pw|not-json").unwrap_err();
        assert_eq!(err.response, "REGISTRATION_FAILED: Invalid word list JSON");
    }

    #[test]
    fn test_register_bad_hardware_json_degrades() {
        let msg = r#"REGISTER|alice|pw|["cat"]|{broken"#;
        match parse_command(msg).unwrap() {
            Command::Register { hardware, .. } => assert!(hardware.is_none()),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_login_optional_fields_absent() {
        match parse_command("LOGIN|alice|pw").unwrap() {
            Command::Login { words, hardware, .. } => {
                assert!(words.is_none());
                assert!(hardware.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_block_submission() {
        let cmd = parse_command("Block ID: 1. Nonce: 5|||00abcdef").unwrap();
        assert_eq!(
            cmd,
            Command::SubmitBlock {
                text: "Block ID: 1. Nonce: 5".to_string(),
                claimed_hash: "00abcdef".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_text_is_echoed() {
        assert_eq!(
            parse_command("hello there").unwrap(),
            Command::Unknown { text: "hello there".to_string() }
        );
    }
}

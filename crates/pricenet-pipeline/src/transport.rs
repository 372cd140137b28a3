//! # Terminal Transports
//!
//! Reachability probing and the three transfer methods for pushing a
//! rendered price file to a legacy terminal.
//!
//! ## Transfer Methods
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Terminal Transfer Methods                          │
//! │                                                                         │
//! │  FTP PUSH                                                              │
//! │  ────────                                                              │
//! │  control channel: 220 → USER/PASS → TYPE I → PASV → STOR              │
//! │  data channel:    write file bytes, close, await 226                   │
//! │  The terminal's FTP service is unauthenticated legacy gear;            │
//! │  credentials default to "anonymous" when unset.                        │
//! │                                                                         │
//! │  RAW STREAM                                                            │
//! │  ──────────                                                            │
//! │  connect (address, port) → write all bytes → shutdown                  │
//! │                                                                         │
//! │  FILE COPY                                                             │
//! │  ─────────                                                             │
//! │  write to the terminal's locally mounted target path                   │
//! │                                                                         │
//! │  Every attempt runs under the per-terminal transfer timeout; a hung    │
//! │  terminal fails its own attempt, never the cycle.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::config::{TerminalConfig, TransferMethod};
use crate::error::{PipelineError, PipelineResult};

/// Default FTP filename when a terminal has no `remote_path`.
const DEFAULT_REMOTE_NAME: &str = "PRICES.TXT";

// =============================================================================
// Reachability Probe
// =============================================================================

/// Probes (address, port) with a short connect timeout.
pub async fn probe(address: &str, port: u16, probe_timeout: Duration) -> bool {
    match timeout(probe_timeout, TcpStream::connect((address, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            debug!(address, port, error = %e, "Probe connect failed");
            false
        }
        Err(_) => {
            debug!(address, port, "Probe timed out");
            false
        }
    }
}

// =============================================================================
// Transfer
// =============================================================================

/// Transfers the rendered file to a terminal via its configured method.
///
/// The whole attempt is bounded by `transfer_timeout`.
pub async fn deliver(
    terminal: &TerminalConfig,
    payload: &[u8],
    transfer_timeout: Duration,
) -> PipelineResult<()> {
    let attempt = async {
        match terminal.method {
            TransferMethod::FtpPush => ftp_push(terminal, payload).await,
            TransferMethod::RawStream => raw_stream(terminal, payload).await,
            TransferMethod::FileCopy => file_copy(terminal, payload).await,
        }
    };

    match timeout(transfer_timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::TransferFailed(format!(
            "{}: transfer timed out after {}s",
            terminal.endpoint(),
            transfer_timeout.as_secs()
        ))),
    }
}

// =============================================================================
// Raw Stream
// =============================================================================

async fn raw_stream(terminal: &TerminalConfig, payload: &[u8]) -> PipelineResult<()> {
    let mut stream = TcpStream::connect((terminal.address.as_str(), terminal.port))
        .await
        .map_err(|e| PipelineError::TransferFailed(format!("{}: {e}", terminal.endpoint())))?;

    stream
        .write_all(payload)
        .await
        .map_err(|e| PipelineError::TransferFailed(format!("{}: {e}", terminal.endpoint())))?;
    stream
        .shutdown()
        .await
        .map_err(|e| PipelineError::TransferFailed(format!("{}: {e}", terminal.endpoint())))?;

    debug!(terminal = %terminal.descriptor, bytes = payload.len(), "Raw stream transfer complete");
    Ok(())
}

// =============================================================================
// File Copy
// =============================================================================

async fn file_copy(terminal: &TerminalConfig, payload: &[u8]) -> PipelineResult<()> {
    let target = terminal.remote_path.as_deref().ok_or_else(|| {
        PipelineError::TransferFailed(format!(
            "terminal '{}' has no remote_path for file copy",
            terminal.descriptor
        ))
    })?;

    if let Some(parent) = std::path::Path::new(target).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::TransferFailed(format!("{target}: {e}")))?;
        }
    }

    tokio::fs::write(target, payload)
        .await
        .map_err(|e| PipelineError::TransferFailed(format!("{target}: {e}")))?;

    debug!(terminal = %terminal.descriptor, target, bytes = payload.len(), "File copy complete");
    Ok(())
}

// =============================================================================
// FTP Push
// =============================================================================

/// Minimal FTP STOR push over the control/data channel pair.
async fn ftp_push(terminal: &TerminalConfig, payload: &[u8]) -> PipelineResult<()> {
    let endpoint = terminal.endpoint();
    let stream = TcpStream::connect((terminal.address.as_str(), terminal.port))
        .await
        .map_err(|e| PipelineError::TransferFailed(format!("{endpoint}: {e}")))?;

    let (read_half, mut write_half) = stream.into_split();
    let mut control = BufReader::new(read_half);

    expect_reply(&mut control, &endpoint, &[220]).await?;

    let user = terminal.username.as_deref().unwrap_or("anonymous");
    send_command(&mut write_half, &format!("USER {user}")).await?;
    let code = expect_reply(&mut control, &endpoint, &[230, 331]).await?;
    if code == 331 {
        let pass = terminal.password.as_deref().unwrap_or("anonymous");
        send_command(&mut write_half, &format!("PASS {pass}")).await?;
        expect_reply(&mut control, &endpoint, &[230]).await?;
    }

    send_command(&mut write_half, "TYPE I").await?;
    expect_reply(&mut control, &endpoint, &[200]).await?;

    send_command(&mut write_half, "PASV").await?;
    let pasv_line = read_reply(&mut control, &endpoint).await?;
    if !pasv_line.starts_with("227") {
        return Err(PipelineError::TransferFailed(format!(
            "{endpoint}: PASV rejected: {pasv_line}"
        )));
    }
    let (data_host, data_port) = parse_pasv(&pasv_line)
        .ok_or_else(|| PipelineError::TransferFailed(format!("{endpoint}: bad PASV reply")))?;

    let remote_name = terminal.remote_path.as_deref().unwrap_or(DEFAULT_REMOTE_NAME);
    send_command(&mut write_half, &format!("STOR {remote_name}")).await?;

    let mut data = TcpStream::connect((data_host.as_str(), data_port))
        .await
        .map_err(|e| PipelineError::TransferFailed(format!("{endpoint}: data channel: {e}")))?;

    expect_reply(&mut control, &endpoint, &[125, 150]).await?;

    data.write_all(payload)
        .await
        .map_err(|e| PipelineError::TransferFailed(format!("{endpoint}: data write: {e}")))?;
    data.shutdown()
        .await
        .map_err(|e| PipelineError::TransferFailed(format!("{endpoint}: data close: {e}")))?;
    drop(data);

    expect_reply(&mut control, &endpoint, &[226, 250]).await?;

    // Best effort; the transfer is already acknowledged.
    let _ = send_command(&mut write_half, "QUIT").await;

    debug!(terminal = %terminal.descriptor, remote_name, bytes = payload.len(), "FTP push complete");
    Ok(())
}

async fn send_command(write_half: &mut OwnedWriteHalf, command: &str) -> PipelineResult<()> {
    write_half
        .write_all(format!("{command}\r\n").as_bytes())
        .await
        .map_err(|e| PipelineError::TransferFailed(format!("control write: {e}")))
}

/// Reads one FTP reply, skipping continuation lines ("123-...").
async fn read_reply(
    control: &mut BufReader<OwnedReadHalf>,
    endpoint: &str,
) -> PipelineResult<String> {
    loop {
        let mut line = String::new();
        let read = control
            .read_line(&mut line)
            .await
            .map_err(|e| PipelineError::TransferFailed(format!("{endpoint}: control read: {e}")))?;
        if read == 0 {
            return Err(PipelineError::TransferFailed(format!(
                "{endpoint}: control channel closed"
            )));
        }

        let line = line.trim_end().to_string();
        // Final reply lines are "NNN <text>"; "NNN-<text>" continues.
        if line.len() >= 4
            && line.as_bytes()[..3].iter().all(u8::is_ascii_digit)
            && line.as_bytes()[3] == b' '
        {
            return Ok(line);
        }
        debug!(endpoint, line = %line, "FTP continuation line");
    }
}

async fn expect_reply(
    control: &mut BufReader<OwnedReadHalf>,
    endpoint: &str,
    accepted: &[u16],
) -> PipelineResult<u16> {
    let line = read_reply(control, endpoint).await?;
    let code: u16 = line[..3]
        .parse()
        .map_err(|_| PipelineError::TransferFailed(format!("{endpoint}: bad reply: {line}")))?;

    if accepted.contains(&code) {
        Ok(code)
    } else {
        Err(PipelineError::TransferFailed(format!(
            "{endpoint}: unexpected reply: {line}"
        )))
    }
}

/// Parses "227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)".
fn parse_pasv(line: &str) -> Option<(String, u16)> {
    let open = line.find('(')?;
    let close = line[open..].find(')')? + open;
    let parts: Vec<u16> = line[open + 1..close]
        .split(',')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.len() != 6 || parts.iter().any(|&p| p > 255) {
        return None;
    }

    let host = format!("{}.{}.{}.{}", parts[0], parts[1], parts[2], parts[3]);
    let port = parts[4] * 256 + parts[5];
    Some((host, port))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_pasv() {
        assert_eq!(
            parse_pasv("227 Entering Passive Mode (192,168,1,21,19,136)"),
            Some(("192.168.1.21".to_string(), 19 * 256 + 136))
        );
        assert_eq!(parse_pasv("227 nonsense"), None);
        assert_eq!(parse_pasv("227 (1,2,3)"), None);
    }

    #[tokio::test]
    async fn test_probe_reachable_and_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(probe("127.0.0.1", port, Duration::from_secs(1)).await);

        drop(listener);
        assert!(!probe("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_raw_stream_delivers_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            received
        });

        let terminal = TerminalConfig {
            descriptor: "till-1".into(),
            address: "127.0.0.1".into(),
            port,
            method: TransferMethod::RawStream,
            username: None,
            password: None,
            remote_path: None,
            device_id: None,
        };

        deliver(&terminal, b"111;Cola;0.99\n", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(server.await.unwrap(), b"111;Cola;0.99\n");
    }

    #[tokio::test]
    async fn test_file_copy_writes_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out").join("PRICES.TXT");

        let terminal = TerminalConfig {
            descriptor: "till-1".into(),
            address: "127.0.0.1".into(),
            port: 9100,
            method: TransferMethod::FileCopy,
            username: None,
            password: None,
            remote_path: Some(target.display().to_string()),
            device_id: None,
        };

        deliver(&terminal, b"111;Cola;0.99\n", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"111;Cola;0.99\n");
    }

    #[tokio::test]
    async fn test_ftp_push_against_minimal_server() {
        // Minimal single-shot FTP server: greets, authenticates, answers
        // PASV with a second listener, accepts STOR.
        let control_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let control_port = control_listener.local_addr().unwrap().port();
        let data_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let data_port = data_listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = control_listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();

            write_half.write_all(b"220 ready\r\n").await.unwrap();

            let mut stored: Option<Vec<u8>> = None;
            while let Ok(Some(line)) = lines.next_line().await {
                let reply: String = if line.starts_with("USER") {
                    "331 need password\r\n".into()
                } else if line.starts_with("PASS") {
                    "230 logged in\r\n".into()
                } else if line.starts_with("TYPE") {
                    "200 binary\r\n".into()
                } else if line.starts_with("PASV") {
                    format!(
                        "227 Entering Passive Mode (127,0,0,1,{},{})\r\n",
                        data_port / 256,
                        data_port % 256
                    )
                } else if line.starts_with("STOR") {
                    write_half.write_all(b"150 go ahead\r\n").await.unwrap();
                    let (mut data, _) = data_listener.accept().await.unwrap();
                    let mut received = Vec::new();
                    data.read_to_end(&mut received).await.unwrap();
                    stored = Some(received);
                    "226 done\r\n".into()
                } else if line.starts_with("QUIT") {
                    write_half.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                } else {
                    "502 not implemented\r\n".into()
                };
                write_half.write_all(reply.as_bytes()).await.unwrap();
            }
            stored
        });

        let terminal = TerminalConfig {
            descriptor: "till-1".into(),
            address: "127.0.0.1".into(),
            port: control_port,
            method: TransferMethod::FtpPush,
            username: Some("pos".into()),
            password: Some("pos".into()),
            remote_path: Some("PRICES.TXT".into()),
            device_id: None,
        };

        deliver(&terminal, b"111;Cola;0.99\n", Duration::from_secs(5))
            .await
            .unwrap();

        let stored = server.await.unwrap();
        assert_eq!(stored.unwrap(), b"111;Cola;0.99\n");
    }
}

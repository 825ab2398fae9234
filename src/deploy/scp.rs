//! SCP upload over an exec channel.
//!
//! The remote side runs `scp -t <destination>` (sink mode) and the exchange
//! is:
//!
//! ```text
//! remote -> \0                          ready
//! local  -> C0755 <size> <name>\n       file header
//! remote -> \0                          header accepted
//! local  -> <size bytes> \0             content and terminator
//! remote -> \0                          file written
//! ```
//!
//! The remote answers `\x01<message>\n` (warning) or `\x02<message>\n`
//! (fatal) instead of `\0` on failure. Both abort the upload.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Mode sent when the local file has no usable permission bits.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Failure of one SCP exchange.
#[derive(Debug)]
pub enum ScpFailure {
    /// Remote sent an error reply
    Remote(String),
    /// Protocol violation or local precondition
    Protocol(String),
    Io(std::io::Error),
}

impl std::fmt::Display for ScpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScpFailure::Remote(message) => write!(f, "remote: {}", message),
            ScpFailure::Protocol(message) => write!(f, "{}", message),
            ScpFailure::Io(e) => write!(f, "{}", e),
        }
    }
}

impl From<std::io::Error> for ScpFailure {
    fn from(e: std::io::Error) -> Self {
        ScpFailure::Io(e)
    }
}

/// Build the remote sink command for `destination` (already shell-quoted).
pub fn sink_command(destination: &str) -> String {
    format!("scp -t {}", destination)
}

/// Format the `C` header line announcing one file.
pub fn file_header(mode: u32, size: u64, name: &str) -> Result<String, ScpFailure> {
    if name.is_empty() || name.contains('\n') || name.contains('/') {
        return Err(ScpFailure::Protocol(format!(
            "file name {:?} cannot be sent over scp",
            name
        )));
    }
    Ok(format!("C{:04o} {} {}\n", mode & 0o7777, size, name))
}

/// Send one file to a remote `scp -t` sink.
///
/// `stream` is the exec channel of the sink; `content` yields exactly `size`
/// bytes. The stream is shut down (EOF sent) after the final acknowledgement.
pub async fn send_file<S, R>(
    stream: &mut S,
    content: &mut R,
    size: u64,
    mode: u32,
    name: &str,
) -> Result<(), ScpFailure>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let header = file_header(mode, size, name)?;

    read_ack(stream).await?;

    stream.write_all(header.as_bytes()).await?;
    stream.flush().await?;
    read_ack(stream).await?;

    let copied = tokio::io::copy(&mut content.take(size), stream).await?;
    if copied != size {
        return Err(ScpFailure::Protocol(format!(
            "local file shrank during transfer ({} of {} bytes)",
            copied, size
        )));
    }
    stream.write_all(&[0]).await?;
    stream.flush().await?;
    read_ack(stream).await?;

    stream.shutdown().await?;
    Ok(())
}

/// Read one acknowledgement from the sink.
async fn read_ack<S>(stream: &mut S) -> Result<(), ScpFailure>
where
    S: AsyncRead + Unpin,
{
    let mut code = [0u8; 1];
    if stream.read(&mut code).await? == 0 {
        return Err(ScpFailure::Protocol(
            "remote scp closed the channel without acknowledging".to_string(),
        ));
    }

    match code[0] {
        0 => Ok(()),
        1 | 2 => Err(ScpFailure::Remote(read_line(stream).await?)),
        other => {
            let rest = read_line(stream).await?;
            Err(ScpFailure::Protocol(format!(
                "unexpected scp response {:?}",
                format!("{}{}", other as char, rest)
            )))
        }
    }
}

async fn read_line<S>(stream: &mut S) -> Result<String, ScpFailure>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while stream.read(&mut byte).await? == 1 {
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&line).trim_end().to_string())
}

/// Permission bits of a local file, as sent in the scp header.
#[cfg(unix)]
pub fn local_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub fn local_mode(_metadata: &std::fs::Metadata) -> u32 {
    DEFAULT_FILE_MODE
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// Plays the remote `scp -t` side: acks everything and returns the bytes
    /// it received.
    async fn accepting_sink(mut remote: tokio::io::DuplexStream) -> Vec<u8> {
        let mut received = Vec::new();
        remote.write_all(&[0]).await.unwrap();

        // Header line
        let mut byte = [0u8; 1];
        loop {
            remote.read_exact(&mut byte).await.unwrap();
            received.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
        }
        remote.write_all(&[0]).await.unwrap();

        // Content plus terminator, until EOF from the client
        let mut rest = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = remote.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            rest.extend_from_slice(&buf[..n]);
            if rest.last() == Some(&0) {
                remote.write_all(&[0]).await.unwrap();
            }
        }
        received.extend_from_slice(&rest);
        received
    }

    mod header {
        use super::*;

        #[test]
        fn test_header_format() {
            assert_eq!(
                file_header(0o755, 12, "main.py").unwrap(),
                "C0755 12 main.py\n"
            );
        }

        #[test]
        fn test_header_masks_file_type_bits() {
            assert_eq!(file_header(0o100644, 0, "a").unwrap(), "C0644 0 a\n");
        }

        #[test]
        fn test_header_rejects_newline_in_name() {
            assert!(file_header(0o644, 1, "bad\nname").is_err());
        }

        #[test]
        fn test_header_rejects_empty_name() {
            assert!(file_header(0o644, 1, "").is_err());
        }

        #[test]
        fn test_sink_command() {
            assert_eq!(sink_command("~/proj/main.py"), "scp -t ~/proj/main.py");
        }
    }

    mod exchange {
        use super::*;

        #[tokio::test]
        async fn test_send_file_byte_exact() {
            let (mut local, remote) = duplex(1024);
            let sink = tokio::spawn(accepting_sink(remote));

            let mut content: &[u8] = b"print('hi')\n";
            send_file(&mut local, &mut content, 12, 0o755, "main.py")
                .await
                .unwrap();
            drop(local);

            let received = sink.await.unwrap();
            assert_eq!(received, b"C0755 12 main.py\nprint('hi')\n\0".to_vec());
        }

        #[tokio::test]
        async fn test_remote_error_on_ready_is_reported() {
            let (mut local, mut remote) = duplex(1024);
            remote
                .write_all(b"\x01scp: ~/proj/main.py: Permission denied\n")
                .await
                .unwrap();

            let mut content: &[u8] = b"x";
            let err = send_file(&mut local, &mut content, 1, 0o644, "main.py")
                .await
                .unwrap_err();
            match err {
                ScpFailure::Remote(message) => {
                    assert_eq!(message, "scp: ~/proj/main.py: Permission denied")
                }
                other => panic!("unexpected failure: {other}"),
            }
        }

        #[tokio::test]
        async fn test_fatal_reply_after_header() {
            let (mut local, mut remote) = duplex(1024);
            let sink = tokio::spawn(async move {
                remote.write_all(&[0]).await.unwrap();
                let mut header = Vec::new();
                let mut byte = [0u8; 1];
                loop {
                    remote.read_exact(&mut byte).await.unwrap();
                    if byte[0] == b'\n' {
                        break;
                    }
                    header.push(byte[0]);
                }
                remote.write_all(b"\x02scp: disk full\n").await.unwrap();
                header
            });

            let mut content: &[u8] = b"abc";
            let err = send_file(&mut local, &mut content, 3, 0o644, "a.txt")
                .await
                .unwrap_err();
            assert!(matches!(err, ScpFailure::Remote(ref m) if m == "scp: disk full"));
            assert_eq!(sink.await.unwrap(), b"C0644 3 a.txt".to_vec());
        }

        #[tokio::test]
        async fn test_closed_channel_is_protocol_error() {
            let (mut local, remote) = duplex(1024);
            drop(remote);

            let mut content: &[u8] = b"abc";
            let err = send_file(&mut local, &mut content, 3, 0o644, "a.txt")
                .await
                .unwrap_err();
            assert!(matches!(err, ScpFailure::Protocol(_) | ScpFailure::Io(_)));
        }

        #[tokio::test]
        async fn test_short_content_is_rejected() {
            let (mut local, remote) = duplex(1024);
            let _sink = tokio::spawn(accepting_sink(remote));

            let mut content: &[u8] = b"ab";
            let err = send_file(&mut local, &mut content, 5, 0o644, "a.txt")
                .await
                .unwrap_err();
            assert!(matches!(err, ScpFailure::Protocol(ref m) if m.contains("shrank")));
        }
    }
}

//! Script subprocess helpers shared by the builder and the server controller

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Which stream a forwarded line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Absolute path of `script` inside `scripts_dir`
pub async fn script_path(scripts_dir: &Path, script: &str) -> std::io::Result<PathBuf> {
    let dir = tokio::fs::canonicalize(scripts_dir).await?;
    Ok(dir.join(script))
}

/// Command for a script with piped output, run from its own directory
pub fn script_command(script: &Path) -> Command {
    let mut cmd = Command::new(script);
    if let Some(dir) = script.parent() {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// Forward `reader` line by line until EOF, handing every line to `on_line`.
///
/// Bytes that are not UTF-8 are replaced, and the stream is drained to EOF
/// even after a read error so the writer never sees a closed pipe.
pub async fn forward_lines<R, F>(reader: R, stream: Stream, echo: bool, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                let line = String::from_utf8_lossy(raw);
                if echo {
                    match stream {
                        Stream::Stdout => println!("{}", line),
                        Stream::Stderr => eprintln!("{}", line),
                    }
                }
                tracing::trace!(?stream, line = %line, "subprocess output");
                on_line(line.as_ref());
            }
            Err(e) => {
                tracing::warn!(?stream, error = %e, "Failed to read subprocess output, discarding the rest");
                if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                    tracing::debug!(?stream, error = %e, "Subprocess output drain stopped");
                }
                break;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Write an executable shell script into `dir`
    pub fn write_script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

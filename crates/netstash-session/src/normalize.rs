//! Output draining and normalization.
//!
//! A command response on an unframed channel has no length or terminator;
//! the only reliable completion signal is silence. The drain loop reads
//! until two consecutive idle windows yield nothing, feeding continuation
//! keystrokes whenever a pagination banner shows up in the buffer.

use netstash_core::config::NormalizerConfig;
use netstash_core::error::{NetStashError, Result, SessionStage};

use crate::channel::RawChannel;
use crate::vendor::VendorProfile;

/// Issue nothing; drain whatever the device sends until it goes quiet,
/// resolving pagination along the way, then strip echo and prompt noise.
/// The caller has already transmitted `command`.
pub async fn drain_command(
    channel: &mut dyn RawChannel,
    cfg: &NormalizerConfig,
    profile: &VendorProfile,
    host: &str,
    command: &str,
) -> Result<String> {
    let start = tokio::time::Instant::now();
    let mut buf: Vec<u8> = Vec::new();
    let mut idle = 0u8;

    while idle < 2 {
        if start.elapsed() >= cfg.drain_deadline() {
            return Err(NetStashError::Timeout {
                host: host.to_string(),
                stage: SessionStage::Drain,
                timeout: cfg.drain_deadline(),
            });
        }

        let chunk = channel.read_chunk(cfg.idle_window()).await?;
        if chunk.is_empty() {
            idle += 1;
            continue;
        }
        idle = 0;
        buf.extend_from_slice(&chunk);

        if strip_paging_marker(&mut buf, profile.paging_markers) {
            channel.send(profile.continue_key).await?;
        }
    }

    Ok(normalize_output(
        &String::from_utf8_lossy(&buf),
        command,
        profile,
        cfg.prompt_line_max,
    ))
}

/// Remove the most recent pagination banner (plus surrounding redraw
/// noise) from the buffer. Returns true when one was found, meaning a
/// continuation keystroke is owed.
fn strip_paging_marker(buf: &mut Vec<u8>, markers: &[&str]) -> bool {
    if markers.is_empty() {
        return false;
    }
    let lower: Vec<u8> = buf.iter().map(u8::to_ascii_lowercase).collect();
    for marker in markers {
        let needle = marker.as_bytes();
        if needle.is_empty() || needle.len() > lower.len() {
            continue;
        }
        if let Some(pos) = lower
            .windows(needle.len())
            .rposition(|w| w == needle)
        {
            let mut start = pos;
            let mut end = pos + needle.len();
            while start > 0 && matches!(buf[start - 1], b' ' | b'\x08' | b'\r') {
                start -= 1;
            }
            while end < buf.len() && matches!(buf[end], b' ' | b'\x08' | b'\r') {
                end += 1;
            }
            buf.drain(start..end);
            return true;
        }
    }
    false
}

/// Post-processing: drop everything through the echoed command, fold line
/// endings, and discard trailing bare-prompt lines.
pub fn normalize_output(
    raw: &str,
    command: &str,
    profile: &VendorProfile,
    prompt_line_max: usize,
) -> String {
    let mut text = raw.replace('\u{8}', "");

    // local echo: discard up to and including the first occurrence of the
    // issued command
    if let Some(pos) = text.find(command) {
        let after = pos + command.len();
        let cut = text[after..]
            .find('\n')
            .map(|i| after + i + 1)
            .unwrap_or(text.len());
        text = text[cut..].to_string();
    }

    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = text
        .lines()
        .filter(|line| !is_bare_prompt(line, profile, prompt_line_max))
        .collect();

    lines.join("\n").trim().to_string()
}

/// A line is a bare prompt when it ends in a prompt terminator and is too
/// short to be a legitimate configuration statement.
fn is_bare_prompt(line: &str, profile: &VendorProfile, prompt_line_max: usize) -> bool {
    let t = line.trim();
    !t.is_empty()
        && t.len() < prompt_line_max
        && profile.prompt_terminators.iter().any(|c| t.ends_with(*c))
}

//! Sink side of the classic `scp` protocol, reduced to a single file.

/// Remote command that accepts one file into the login directory.
pub const SCP_SINK_COMMAND: &str = "scp -t .";

/// Permission bits announced for staged files.
pub const SCP_FILE_MODE: &str = "0644";

/// Builds the bytes a sink expects for one file: the `C` directive with
/// mode, length and name, the raw content, then a NUL terminator.
#[must_use]
pub fn scp_frame(content: &[u8], file_name: &str) -> Vec<u8> {
    let header = format!("C{SCP_FILE_MODE} {} {file_name}\n", content.len());
    let mut frame = Vec::with_capacity(header.len() + content.len() + 1);
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(content);
    frame.push(0);
    frame
}

/// Extracts the human-readable reason from a failed sink session.
///
/// Sinks report errors as a `0x01` (warning) or `0x02` (fatal) byte
/// followed by a message line on stdout.
pub(super) fn sink_message(stdout: &str, stderr: &str) -> String {
    let reported = stdout
        .split(['\u{1}', '\u{2}'])
        .skip(1)
        .map(str::trim)
        .find(|line| !line.is_empty());
    reported.map_or_else(|| stderr.trim().to_owned(), str::to_owned)
}

//! Escape sequence sanitization for terminal output.
//!
//! Output read from a pseudo-terminal is full of control sequences meant for
//! a terminal emulator: colors, cursor movement, window titles, bracketed
//! paste toggles. Consumers of ubterm display plain text, so every chunk the
//! pump reads goes through [`sanitize`] before it is buffered.
//!
//! Chunks are not aligned on sequence boundaries. A sequence split across two
//! reads is not reassembled: the halves degrade to partial literal text with
//! the ESC byte removed. This is a known limitation of stateless cleaning.

use std::sync::LazyLock;

use regex::Regex;

/// Complete OSC sequences (`ESC ] ... BEL` or `ESC ] ... ESC \`).
static OSC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B\][^\x07\x1B]*(?:\x07|\x1B\\)").expect("Invalid OSC regex")
});

/// ESC followed by a single Fe byte, or a full CSI sequence with parameters.
static ANSI_ESCAPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\x5C-_]|\[[0-?]*[ -/]*[@-~])").expect("Invalid ANSI regex")
});

/// C0 controls and DEL, except tab and newline.
static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0B-\x1F\x7F]").expect("Invalid control regex"));

static SPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" {2,}").expect("Invalid space regex"));

/// Literal sequences removed after the pattern pass.
///
/// Most of these are already matched by [`ANSI_ESCAPE_PATTERN`]; the list
/// catches leftovers from sequences the pattern only partially consumed.
const PROBLEMATIC_SEQUENCES: &[&str] = &[
    "\x1b]0;",    // window title
    "\x07",       // bell
    "\x1b[?2004h", // bracketed paste on
    "\x1b[?2004l", // bracketed paste off
    "\x1b[01;31m",
    "\x1b[01;32m",
    "\x1b[01;33m",
    "\x1b[01;34m",
    "\x1b[01;35m",
    "\x1b[01;36m",
    "\x1b[31m",
    "\x1b[32m",
    "\x1b[33m",
    "\x1b[34m",
    "\x1b[35m",
    "\x1b[36m",
    "\x1b[00m",
    "\x1b[0m",
    "\x1b[m",
    "\x1b[K",
    "\x1b[H",
    "\x1b[2J",
    "\x1b[J",
    "\x1b[0G",
];

/// Converts a raw terminal chunk into display-safe text.
///
/// Strips OSC and CSI sequences, the fixed list of problematic literals,
/// remaining C0 control characters (keeping `\n` and `\t`), and collapses
/// runs of spaces on each line into a single space. Line boundaries are
/// preserved and lines are not trimmed.
pub fn sanitize(chunk: &str) -> String {
    let text = OSC_PATTERN.replace_all(chunk, "");
    let text = ANSI_ESCAPE_PATTERN.replace_all(&text, "");

    let mut text = text.into_owned();
    for seq in PROBLEMATIC_SEQUENCES {
        if text.contains(seq) {
            text = text.replace(seq, "");
        }
    }

    let text = CONTROL_CHARS.replace_all(&text, "");

    // A newline is never a space, so collapsing over the whole chunk cannot
    // merge two lines.
    SPACE_RUNS.replace_all(&text, " ").into_owned()
}

//! The `ParseFrame`/`Serialize` collaborator: turns a single IRC protocol
//! line into a [`Frame`] and back. This crate only tokenizes — it has no
//! notion of sockets, sessions, or channel membership.

mod numerics;

/// Classification of [`Frame::command`], mirrored from the numeric reply
/// range (or, for text commands, the literal `ERROR` command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Normal,
    Error,
    Reply,
}

/// One parsed IRC protocol line.
///
/// `command` is the symbolic name for replies that have one (`"rpl_welcome"`,
/// `"err_nicknameinuse"`, …) or the literal command word otherwise
/// (`"PRIVMSG"`). `raw_command` always keeps the token exactly as it appeared
/// on the wire, so a numeric reply's digits survive even after `command` is
/// resolved to its symbolic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub prefix: Option<String>,
    pub nick: Option<String>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub command: String,
    pub command_type: CommandType,
    pub raw_command: String,
    pub args: Vec<String>,
}

impl Frame {
    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.args.get(idx).map(String::as_str)
    }
}

/// Parse one already-delimited IRC line (no trailing `\r`/`\n`) into a
/// [`Frame`]. Never fails: a line that doesn't tokenize cleanly yields a
/// `Frame` with an empty `args` vector rather than an error, since a single
/// malformed line from a flaky server must never take the whole connection
/// down.
///
/// `strip_colors` removes mIRC-style formatting control codes from the
/// trailing parameter before it's handed back (see [`strip_formatting`]);
/// actual color *names*/constants are a presentation-layer concern and live
/// outside this crate.
pub fn parse_frame(line: &str, strip_colors: bool) -> Frame {
    let mut rest = line;

    let (prefix, nick, user, host) = if let Some(stripped) = rest.strip_prefix(':') {
        let (pfx, after) = match stripped.split_once(' ') {
            Some((pfx, after)) => (pfx, after),
            None => (stripped, ""),
        };
        rest = after;
        let (nick, user, host) = split_prefix(pfx);
        (Some(pfx.to_owned()), nick, user, host)
    } else {
        (None, None, None, None)
    };

    let (raw_command, params_str) = match rest.split_once(' ') {
        Some((cmd, params)) => (cmd, params),
        None => (rest, ""),
    };
    let raw_command = raw_command.to_owned();

    let mut args = split_params(params_str);
    if strip_colors {
        if let Some(last) = args.last_mut() {
            *last = strip_formatting(last);
        }
    }

    let (command, command_type) = classify(&raw_command);

    Frame {
        prefix,
        nick,
        user,
        host,
        command,
        command_type,
        raw_command,
        args,
    }
}

fn split_prefix(pfx: &str) -> (Option<String>, Option<String>, Option<String>) {
    // <prefix> ::= <servername> | <nick> [ '!' <user> ] [ '@' <host> ]
    match pfx.split_once('!') {
        Some((nick, rest)) => match rest.split_once('@') {
            Some((user, host)) => (
                Some(nick.to_owned()),
                Some(user.to_owned()),
                Some(host.to_owned()),
            ),
            None => (Some(nick.to_owned()), Some(rest.to_owned()), None),
        },
        None => match pfx.split_once('@') {
            Some((nick, host)) => (Some(nick.to_owned()), None, Some(host.to_owned())),
            None => (Some(pfx.to_owned()), None, None),
        },
    }
}

fn split_params(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = s;
    loop {
        if rest.is_empty() {
            return out;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            out.push(trailing.to_owned());
            return out;
        }
        match rest.split_once(' ') {
            Some((head, tail)) => {
                out.push(head.to_owned());
                rest = tail;
            }
            None => {
                out.push(rest.to_owned());
                return out;
            }
        }
    }
}

fn classify(raw_command: &str) -> (String, CommandType) {
    if let Ok(num) = raw_command.parse::<u16>() {
        let ty = if (400..600).contains(&num) {
            CommandType::Error
        } else {
            CommandType::Reply
        };
        let name = numerics::symbolic_name(num)
            .map(str::to_owned)
            .unwrap_or_else(|| raw_command.to_owned());
        (name, ty)
    } else if raw_command.eq_ignore_ascii_case("ERROR") {
        (raw_command.to_uppercase(), CommandType::Error)
    } else {
        (raw_command.to_uppercase(), CommandType::Normal)
    }
}

/// Strip mIRC-style formatting control codes (bold, color, underline, …) from
/// a text payload. This is the one sliver of "formatting" this crate owns —
/// the named color constants and palette themselves are an application
/// concern, not this protocol engine's.
pub fn strip_formatting(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            0x02 | 0x1d | 0x1f | 0x16 | 0x0f => {
                i += 1;
            }
            0x03 => {
                i += 1;
                // Optional foreground[,background] digits (at most 2 each).
                for _ in 0..2 {
                    if i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                if i < bytes.len() && bytes[i] == b',' {
                    let save = i;
                    let mut j = i + 1;
                    let mut digits = 0;
                    while j < bytes.len() && bytes[j].is_ascii_digit() && digits < 2 {
                        j += 1;
                        digits += 1;
                    }
                    if digits > 0 {
                        i = j;
                    } else {
                        i = save;
                    }
                }
            }
            _ => {
                // Copy whole UTF-8 sequences; we only skip single-byte ASCII
                // control codes above, so this never splits a codepoint.
                let start = i;
                i += 1;
                while i < bytes.len() && (bytes[i] & 0b1100_0000) == 0b1000_0000 {
                    i += 1;
                }
                out.push_str(std::str::from_utf8(&bytes[start..i]).unwrap_or_default());
            }
        }
    }
    out
}

/// Serialize a command and its arguments into one outbound IRC line,
/// terminated with `\r\n`. If the final argument contains whitespace, begins
/// with `:`, or is empty, it is sent as the "trailing" parameter (prefixed
/// with `:`). No other quoting or escaping is performed.
pub fn encode(cmd: &str, args: &[&str]) -> String {
    let mut parts: Vec<String> = vec![cmd.to_owned()];
    for (idx, arg) in args.iter().enumerate() {
        let is_last = idx == args.len() - 1;
        if is_last && (arg.is_empty() || arg.starts_with(':') || arg.contains(' ')) {
            parts.push(format!(":{arg}"));
        } else {
            parts.push((*arg).to_owned());
        }
    }
    format!("{}\r\n", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefix_and_trailing() {
        let f = parse_frame("nick!u@h.example PRIVMSG #chan :hello there", false);
        assert_eq!(f.nick.as_deref(), Some("nick"));
        assert_eq!(f.user.as_deref(), Some("u"));
        assert_eq!(f.host.as_deref(), Some("h.example"));
        assert_eq!(f.command, "PRIVMSG");
        assert_eq!(f.raw_command, "PRIVMSG");
        assert_eq!(f.args, vec!["#chan", "hello there"]);
        assert_eq!(f.command_type, CommandType::Normal);
    }

    #[test]
    fn parses_without_prefix() {
        let f = parse_frame("PING :abc", false);
        assert_eq!(f.prefix, None);
        assert_eq!(f.args, vec!["abc"]);
    }

    #[test]
    fn numeric_is_mapped_and_raw_kept() {
        let f = parse_frame("srv 001 nick :Welcome", false);
        assert_eq!(f.command, "rpl_welcome");
        assert_eq!(f.raw_command, "001");
        assert_eq!(f.command_type, CommandType::Reply);
    }

    #[test]
    fn unknown_numeric_falls_back_to_digits() {
        let f = parse_frame("srv 999 nick :mystery", false);
        assert_eq!(f.command, "999");
        assert_eq!(f.raw_command, "999");
    }

    #[test]
    fn error_range_numeric_is_classified_error() {
        let f = parse_frame("srv 433 nick newnick :Nickname is already in use", false);
        assert_eq!(f.command, "err_nicknameinuse");
        assert_eq!(f.command_type, CommandType::Error);
    }

    #[test]
    fn malformed_line_yields_empty_args_not_a_failure() {
        let f = parse_frame("", false);
        assert_eq!(f.raw_command, "");
        assert!(f.args.is_empty());
    }

    #[test]
    fn strips_color_codes_when_requested() {
        let f = parse_frame("n!u@h PRIVMSG #c :\x0304red\x03 plain", true);
        assert_eq!(f.args[1], "red plain");
    }

    #[test]
    fn round_trip_trailing_marker() {
        let line = encode("PRIVMSG", &["#chan", "hello world"]);
        assert_eq!(line, "PRIVMSG #chan :hello world\r\n");
        let f = parse_frame(line.trim_end_matches("\r\n"), false);
        assert_eq!(f.args, vec!["#chan", "hello world"]);
    }

    #[test]
    fn encode_quotes_empty_and_colon_prefixed_trailing_args() {
        assert_eq!(encode("AWAY", &[""]), "AWAY :\r\n");
        assert_eq!(
            encode("PRIVMSG", &["x", ":already"]),
            "PRIVMSG x ::already\r\n"
        );
    }
}

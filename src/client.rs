//! User-facing operations: join/part/say/notice/action/ctcp/whois/list/who/
//! mode changes. Responsible for long-line splitting and the handful of
//! self-echo events real chat UIs need (`selfMessage`) that never come back
//! from the server.

use irc_common::ChanNameRef;
use irc_wire::encode;

use crate::config::Options;
use crate::events::{EventBus, Value};
use crate::state::SessionState;
use crate::utils::split_iterator;

pub struct CommandApi<'a> {
    pub state: &'a mut SessionState,
    pub events: &'a mut EventBus,
    pub opt: &'a Options,
    pub outgoing: Vec<String>,
}

impl<'a> CommandApi<'a> {
    fn send(&mut self, cmd: &str, args: &[&str]) {
        self.outgoing.push(encode(cmd, args));
    }

    /// `cb` fires once, when the matching `join<channel>` event comes back
    /// from the protocol handler.
    pub fn join(&mut self, channel: &str, key: Option<&str>, cb: impl FnMut(&[Value]) + 'static) {
        match key {
            Some(k) => self.send("JOIN", &[channel, k]),
            None => self.send("JOIN", &[channel]),
        }
        self.events.once(format!("join{}", channel.to_lowercase()), cb);
    }

    pub fn part(&mut self, channel: &str, message: Option<&str>, cb: impl FnMut(&[Value]) + 'static) {
        match message {
            Some(m) => self.send("PART", &[channel, m]),
            None => self.send("PART", &[channel]),
        }
        self.events.once(format!("part{}", channel.to_lowercase()), cb);
    }

    /// `say`/`notice`: split `text` into protocol-legal sub-lines and send
    /// one `PRIVMSG`/`NOTICE` per sub-line. Returns the sub-lines sent, so a
    /// caller emitting `selfMessage` for PRIVMSG can do so per sub-line.
    fn send_lines(&mut self, cmd: &str, target: &str, text: &str) -> Vec<String> {
        let max = (self.state.max_line_length - target.len() as i64).max(1) as usize;
        let mut sent = Vec::new();
        for line in text.split('\n') {
            for part in split_iterator(line, max) {
                self.send(cmd, &[target, part]);
                sent.push(part.to_owned());
            }
        }
        sent
    }

    pub fn say(&mut self, target: &str, text: &str) {
        let lines = self.send_lines("PRIVMSG", target, text);
        for line in lines {
            let _ = self.events.emit(
                "selfMessage",
                &[Value::from(target.to_owned()), Value::from(line)],
                self.state.requested_disconnect,
            );
        }
    }

    pub fn notice(&mut self, target: &str, text: &str) {
        self.send_lines("NOTICE", target, text);
    }

    pub fn action(&mut self, target: &str, text: &str) {
        for line in text.split('\n').filter(|l| !l.is_empty()) {
            self.say(target, &format!("\u{1}ACTION {line}\u{1}"));
        }
    }

    pub fn ctcp(&mut self, target: &str, ctcp_type: &str, text: &str) {
        let payload = format!("\u{1}{text}\u{1}");
        if ctcp_type.eq_ignore_ascii_case("privmsg") {
            self.say(target, &payload);
        } else {
            self.notice(target, &payload);
        }
    }

    pub fn whois(&mut self, nick: &str) {
        self.send("WHOIS", &[nick]);
    }

    pub fn list(&mut self, args: &[&str]) {
        self.send("LIST", args);
    }

    /// Validate and normalize a WHO format string: `o` always passes; a
    /// `%`-format only passes when the server advertises WHOX, and is
    /// filtered down to letters this engine understands.
    fn normalize_who_format(&self, format: Option<&str>) -> Option<String> {
        let format = format?;
        if format == "o" {
            return Some(format.to_owned());
        }
        if let Some(rest) = format.strip_prefix('%') {
            if !self.state.supported.whox {
                return None;
            }
            let known = "tcuihsnfdalr";
            let filtered: String = rest.chars().filter(|c| known.contains(*c)).collect();
            if filtered.is_empty() {
                return None;
            }
            return Some(format!("%{filtered}"));
        }
        None
    }

    pub fn who(&mut self, target: &str, format: Option<&str>) {
        let normalized = self.normalize_who_format(format);
        let sort_format = normalized
            .clone()
            .unwrap_or_else(|| if self.state.supported.whox { "%cuhsnfdr".to_owned() } else { String::new() });
        self.state
            .who
            .entry(target.to_owned())
            .or_default()
            .queue
            .push_back(sort_format);
        match normalized {
            Some(f) => self.send("WHO", &[target, &f]),
            None => self.send("WHO", &[target]),
        }
    }

    /// `+m`/`-m` over `nicks`, filtered to those who need the change, batched
    /// to `supported.modes` nicks per `MODE` line. Requires self to have
    /// channel op; otherwise a no-op with a debug log (validation errors
    /// never throw).
    pub fn set_chan_mode(&mut self, channel: &str, sign: char, mode: char, nicks: &[&str]) {
        let chan_ref = ChanNameRef::new(channel);
        if !self.state.have_op(chan_ref, &self.state.own_nick.clone()) {
            log::debug!("set_chan_mode: not opped in {channel}");
            return;
        }
        let targets: Vec<&str> = nicks
            .iter()
            .filter(|n| {
                let has = self.state.nick_has_chan_mode(chan_ref, n, mode);
                if sign == '+' {
                    !has
                } else {
                    has
                }
            })
            .copied()
            .collect();
        if targets.is_empty() {
            return;
        }
        let batch_size = self.state.supported.modes.unwrap_or(targets.len() as u32).max(1) as usize;
        for batch in targets.chunks(batch_size) {
            let mode_spec = format!("{sign}{}", mode.to_string().repeat(batch.len()));
            let mut args: Vec<&str> = vec![channel, &mode_spec];
            args.extend(batch.iter().copied());
            self.send("MODE", &args);
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn api<'a>(state: &'a mut SessionState, events: &'a mut EventBus, opt: &'a Options) -> CommandApi<'a> {
        CommandApi { state, events, opt, outgoing: Vec::new() }
    }

    #[test]
    fn say_splits_long_lines() {
        let mut state = SessionState::new("nick", "&#");
        state.max_line_length = 20;
        let mut events = EventBus::new();
        let opt = Options::new("irc.example.org", "nick");
        let mut a = api(&mut state, &mut events, &opt);
        a.say("#c", "hello world of irc testing");
        assert!(a.outgoing.len() > 1);
        assert!(a.outgoing.iter().all(|l| l.starts_with("PRIVMSG #c :")));
    }

    #[test]
    fn who_format_requires_whox_for_percent_formats() {
        let mut state = SessionState::new("nick", "&#");
        let mut events = EventBus::new();
        let opt = Options::new("irc.example.org", "nick");
        let mut a = api(&mut state, &mut events, &opt);
        a.who("#c", Some("%cuhnfa"));
        assert_eq!(a.outgoing, vec!["WHO #c\r\n".to_owned()]);
    }

    #[test]
    fn who_format_o_always_passes() {
        let mut state = SessionState::new("nick", "&#");
        let mut events = EventBus::new();
        let opt = Options::new("irc.example.org", "nick");
        let mut a = api(&mut state, &mut events, &opt);
        a.who("#c", Some("o"));
        assert_eq!(a.outgoing, vec!["WHO #c o\r\n".to_owned()]);
    }
}

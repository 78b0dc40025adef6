//! The in-memory session model: own nick/hostmask, joined channels and their
//! members, pending WHOIS/WHO accumulators, negotiated ISUPPORT features and
//! capabilities.
//!
//! All of this used to live on the containing object's prototype in the
//! source this was grown from, which meant every session sharing the same
//! class shared the same `chans`/`_whoisData`/`_who` maps — a latent bug.
//! Here every field below is a plain per-instance field of [`SessionState`],
//! constructed fresh by [`SessionState::new`].

use std::collections::{HashMap, HashSet, VecDeque};

use irc_common::ChanNameRef;

#[derive(Debug, Clone, Default)]
pub struct UserEntry {
    pub username: Option<String>,
    pub host: Option<String>,
    pub away: Option<bool>,
    pub modes: HashSet<char>,
    pub account: Option<String>,
    pub is_registered: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub key: String,
    pub server_name: String,
    pub users: HashMap<String, UserEntry>,
    pub mode: String,
    pub topic: Option<String>,
    pub topic_by: Option<String>,
    pub created: Option<String>,
}

impl Channel {
    fn new(server_name: &str, key: String) -> Self {
        Channel {
            key,
            server_name: server_name.to_owned(),
            users: HashMap::new(),
            mode: String::new(),
            topic: None,
            topic_by: None,
            created: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WhoisData {
    pub nick: Option<String>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub realname: Option<String>,
    pub server: Option<String>,
    pub serverinfo: Option<String>,
    pub idle: Option<String>,
    pub channels: Vec<String>,
    pub operator: bool,
    pub account: Option<String>,
    pub accountinfo: Option<String>,
    pub away: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WhoState {
    pub data: Vec<Vec<String>>,
    pub queue: VecDeque<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChanModeGroups {
    pub a: String,
    pub b: String,
    pub c: String,
    pub d: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelSupport {
    pub length: Option<u32>,
    pub types: String,
    pub limit: HashMap<char, u32>,
    pub modes: ChanModeGroups,
    pub idlength: HashMap<char, String>,
}

#[derive(Debug, Clone, Default)]
pub struct Supported {
    pub channel: ChannelSupport,
    pub kicklength: Option<String>,
    pub nicklength: Option<u32>,
    pub topiclength: Option<u32>,
    pub modes: Option<u32>,
    pub maxlist: HashMap<String, u32>,
    pub maxtargets: HashMap<String, u32>,
    pub whox: bool,
    pub usermodes: Option<String>,
    pub capabilities: HashMap<String, Option<String>>,
}

#[derive(Debug, Clone)]
pub struct ChannelListEntry {
    pub name: String,
    pub users: Option<String>,
    pub topic: Option<String>,
}

pub struct SessionState {
    pub own_nick: String,
    pub host_mask: String,
    pub max_line_length: i64,
    pub capabilities: HashSet<String>,
    pub pending_cap_req: Vec<String>,
    pub chans: HashMap<String, Channel>,
    pub sync_chans: HashMap<String, u64>,
    pub motd_buffer: String,
    pub channel_list: Vec<ChannelListEntry>,
    pub prefix_for_mode: HashMap<char, char>,
    pub mode_for_prefix: HashMap<char, char>,
    pub supported: Supported,
    pub whois_data: HashMap<String, WhoisData>,
    pub who: HashMap<String, WhoState>,
    pub requested_disconnect: bool,
    /// Tracks the `nick1`, `nick2`, … escalation on repeated 433. Not named
    /// in the session-globals table directly; it's the counter that table's
    /// "recompute on any nick change" invariant needs somewhere to live.
    pub nick_attempt: u32,
}

impl SessionState {
    pub fn new(nick: &str, channel_prefixes: &str) -> Self {
        SessionState {
            own_nick: nick.to_owned(),
            host_mask: String::new(),
            max_line_length: 497 - nick.len() as i64,
            capabilities: HashSet::new(),
            pending_cap_req: Vec::new(),
            chans: HashMap::new(),
            sync_chans: HashMap::new(),
            motd_buffer: String::new(),
            channel_list: Vec::new(),
            prefix_for_mode: HashMap::new(),
            mode_for_prefix: HashMap::new(),
            supported: Supported {
                channel: ChannelSupport {
                    types: channel_prefixes.to_owned(),
                    ..Default::default()
                },
                ..Default::default()
            },
            whois_data: HashMap::new(),
            who: HashMap::new(),
            requested_disconnect: false,
            nick_attempt: 0,
        }
    }

    /// `maxLineLength == 497 - len(ownNick) - len(hostMask)`, recomputed on
    /// any change to either.
    pub fn recompute_max_line_length(&mut self) {
        self.max_line_length = 497 - self.own_nick.len() as i64 - self.host_mask.len() as i64;
    }

    pub fn set_own_nick(&mut self, nick: &str) {
        self.own_nick = nick.to_owned();
        self.recompute_max_line_length();
    }

    pub fn set_host_mask(&mut self, host_mask: &str) {
        self.host_mask = host_mask.to_owned();
        self.recompute_max_line_length();
    }

    /// Returns the channel by lowercase key, creating a skeleton entry if
    /// `create` and it doesn't exist yet.
    pub fn chan_data(&mut self, name: &ChanNameRef, create: bool) -> Option<&mut Channel> {
        let key = name.key();
        if create {
            Some(
                self.chans
                    .entry(key.clone())
                    .or_insert_with(|| Channel::new(name.as_str(), key)),
            )
        } else {
            self.chans.get_mut(&key)
        }
    }

    pub fn chan_data_ref(&self, name: &ChanNameRef) -> Option<&Channel> {
        self.chans.get(&name.key())
    }

    /// Channels (by key) that currently list `nick` as a member. If
    /// `remove`, the membership is dropped as part of the scan.
    pub fn nick_in_channels(&mut self, nick: &str, remove: bool) -> Vec<String> {
        let mut found = Vec::new();
        for (key, chan) in self.chans.iter_mut() {
            let present = if remove {
                chan.users.remove(nick).is_some()
            } else {
                chan.users.contains_key(nick)
            };
            if present {
                found.push(key.clone());
            }
        }
        found
    }

    /// The lower-level membership-mode check the spec's open questions call
    /// out by name: takes an already-resolved `UserEntry`, not a nick.
    pub fn user_has_chan_mode(&self, user: &UserEntry, mode: char) -> bool {
        user.modes.contains(&mode)
    }

    pub fn nick_has_chan_mode(&self, chan: &ChanNameRef, nick: &str, mode: char) -> bool {
        match self.chan_data_ref(chan).and_then(|c| c.users.get(nick)) {
            Some(user) => self.user_has_chan_mode(user, mode),
            None => {
                log::debug!("nick_has_chan_mode: unknown channel or nick ({chan}, {nick})");
                false
            }
        }
    }

    pub fn have_op(&self, chan: &ChanNameRef, nick: &str) -> bool {
        self.nick_has_chan_mode(chan, nick, 'o')
    }

    pub fn have_voice(&self, chan: &ChanNameRef, nick: &str) -> bool {
        self.nick_has_chan_mode(chan, nick, 'v')
    }

    pub fn nicks_with_chan_mode(&self, chan: &ChanNameRef, mode: char) -> Vec<String> {
        match self.chan_data_ref(chan) {
            Some(c) => c
                .users
                .iter()
                .filter(|(_, u)| self.user_has_chan_mode(u, mode))
                .map(|(nick, _)| nick.clone())
                .collect(),
            None => {
                log::debug!("nicks_with_chan_mode: unknown channel {chan}");
                Vec::new()
            }
        }
    }

    pub fn users_with_chan_mode<'a>(
        &'a self,
        chan: &ChanNameRef,
        mode: char,
    ) -> Vec<(&'a str, &'a UserEntry)> {
        match self.chan_data_ref(chan) {
            Some(c) => c
                .users
                .iter()
                .filter(|(_, u)| self.user_has_chan_mode(u, mode))
                .map(|(nick, u)| (nick.as_str(), u))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Nicks in `chan` that lack `without_modes`. `combined=true` requires a
    /// user to lack *all* of `without_modes` to be excluded (AND); otherwise
    /// lacking *any one* of them is enough to exclude (OR).
    pub fn nicks_in_channel(
        &self,
        chan: &ChanNameRef,
        without_modes: &[char],
        combined: bool,
    ) -> Vec<String> {
        let Some(c) = self.chan_data_ref(chan) else {
            log::debug!("nicks_in_channel: unknown channel {chan}");
            return Vec::new();
        };
        c.users
            .iter()
            .filter(|(_, user)| {
                if without_modes.is_empty() {
                    return true;
                }
                if combined {
                    !without_modes
                        .iter()
                        .all(|m| self.user_has_chan_mode(user, *m))
                } else {
                    !without_modes
                        .iter()
                        .any(|m| self.user_has_chan_mode(user, *m))
                }
            })
            .map(|(nick, _)| nick.clone())
            .collect()
    }

    /// Absorb one `rpl_isupport` line's tokens (excluding the leading nick
    /// arg and the trailing human-readable comment).
    pub fn absorb_isupport(&mut self, tokens: &[String]) {
        for token in tokens {
            let (name, value) = match token.split_once('=') {
                Some((n, v)) => (n, Some(v)),
                None => (token.as_str(), None),
            };
            match name {
                "CHANLIMIT" => {
                    for (prefix, n) in parse_prefix_int_list(value.unwrap_or("")) {
                        self.supported.channel.limit.insert(prefix, n);
                    }
                }
                "IDCHAN" => {
                    for pair in value.unwrap_or("").split(',') {
                        if let Some((prefix, v)) = pair.split_once(':') {
                            if let Some(c) = prefix.chars().next() {
                                self.supported.channel.idlength.insert(c, v.to_owned());
                            }
                        }
                    }
                }
                "MAXLIST" => {
                    for (prefix, n) in parse_prefix_int_list(value.unwrap_or("")) {
                        self.supported.maxlist.insert(prefix.to_string(), n);
                    }
                }
                "TARGMAX" => {
                    for pair in value.unwrap_or("").split(',') {
                        if pair.is_empty() {
                            continue;
                        }
                        let (key, n) = match pair.split_once(':') {
                            Some((k, v)) => (k, v.parse::<u32>().unwrap_or(0)),
                            None => (pair, 0),
                        };
                        self.supported.maxtargets.insert(key.to_owned(), n);
                    }
                }
                "CHANMODES" => {
                    let groups: Vec<&str> = value.unwrap_or("").split(',').collect();
                    if let Some(g) = groups.first() {
                        self.supported.channel.modes.a.push_str(g);
                    }
                    if let Some(g) = groups.get(1) {
                        self.supported.channel.modes.b.push_str(g);
                    }
                    if let Some(g) = groups.get(2) {
                        self.supported.channel.modes.c.push_str(g);
                    }
                    if let Some(g) = groups.get(3) {
                        self.supported.channel.modes.d.push_str(g);
                    }
                }
                "CHANTYPES" => {
                    self.supported.channel.types = value.unwrap_or("").to_owned();
                }
                "CHANNELLEN" => {
                    self.supported.channel.length = value.and_then(|v| v.parse().ok());
                }
                "NICKLEN" => {
                    self.supported.nicklength = value.and_then(|v| v.parse().ok());
                }
                "TOPICLEN" => {
                    self.supported.topiclength = value.and_then(|v| v.parse().ok());
                }
                "MODES" => {
                    self.supported.modes = value.and_then(|v| v.parse().ok());
                }
                "KICKLEN" => {
                    self.supported.kicklength = Some(value.unwrap_or("").to_owned());
                }
                "PREFIX" => {
                    if let Some(v) = value {
                        if let Some((modes, prefixes)) = parse_prefix_token(v) {
                            for (m, p) in modes.chars().zip(prefixes.chars()) {
                                self.mode_for_prefix.insert(p, m);
                                self.prefix_for_mode.insert(m, p);
                            }
                            self.supported.channel.modes.b.push_str(&modes);
                        }
                    }
                }
                "WHOX" => {
                    self.supported.whox = true;
                }
                _ => {}
            }
        }
    }
}

fn parse_prefix_int_list(s: &str) -> Vec<(char, u32)> {
    s.split(',')
        .filter(|p| !p.is_empty())
        .filter_map(|pair| {
            let (prefix, n) = match pair.split_once(':') {
                Some((p, v)) => (p, v.parse().unwrap_or(0)),
                None => (pair, 0),
            };
            prefix.chars().next().map(|c| (c, n))
        })
        .collect()
}

fn parse_prefix_token(v: &str) -> Option<(&str, &str)> {
    let v = v.strip_prefix('(')?;
    v.split_once(')')
}

#[cfg(test)]
mod tests {
    use super::*;
    use irc_common::ChanName;

    #[test]
    fn max_line_length_follows_nick_and_hostmask() {
        let mut s = SessionState::new("nick", "&#");
        s.set_host_mask("nick!u@h.example");
        assert_eq!(s.max_line_length, 497 - 4 - 17);
    }

    #[test]
    fn chan_data_creates_and_finds_by_lowercase_key() {
        let mut s = SessionState::new("nick", "&#");
        let chan_name: ChanName = "#RustLang".into();
        s.chan_data(&chan_name, true);
        assert!(s.chan_data_ref(ChanNameRef::new("#rustlang")).is_some());
        let c = s.chan_data_ref(ChanNameRef::new("#rustlang")).unwrap();
        assert_eq!(c.key, "#rustlang");
        assert_eq!(c.server_name, "#RustLang");
    }

    #[test]
    fn isupport_prefix_builds_both_mapping_directions() {
        let mut s = SessionState::new("nick", "&#");
        s.absorb_isupport(&["PREFIX=(ov)@+".to_owned()]);
        assert_eq!(s.mode_for_prefix.get(&'@'), Some(&'o'));
        assert_eq!(s.mode_for_prefix.get(&'+'), Some(&'v'));
        assert_eq!(s.prefix_for_mode.get(&'o'), Some(&'@'));
        assert_eq!(s.prefix_for_mode.get(&'v'), Some(&'+'));
    }

    #[test]
    fn isupport_nicklen_and_chantypes() {
        let mut s = SessionState::new("nick", "&#");
        s.absorb_isupport(&["NICKLEN=16".to_owned(), "CHANTYPES=#".to_owned()]);
        assert_eq!(s.supported.nicklength, Some(16));
        assert_eq!(s.supported.channel.types, "#");
    }

    #[test]
    fn mode_merge_on_repeated_toggles() {
        let mut s = SessionState::new("nick", "&#");
        let chan_name: ChanName = "#a".into();
        let chan = s.chan_data(&chan_name, true).unwrap();
        chan.users.insert("alice".to_owned(), UserEntry::default());
        let user = chan.users.get_mut("alice").unwrap();
        user.modes.insert('o');
        user.modes.insert('v');
        user.modes.remove(&'o');
        assert_eq!(user.modes, HashSet::from(['v']));
    }

    #[test]
    fn nicks_in_channel_combined_vs_or() {
        let mut s = SessionState::new("nick", "&#");
        let chan_name: ChanName = "#a".into();
        let chan = s.chan_data(&chan_name, true).unwrap();
        let mut op_and_voice = UserEntry::default();
        op_and_voice.modes.insert('o');
        op_and_voice.modes.insert('v');
        chan.users.insert("alice".to_owned(), op_and_voice);
        let mut op_only = UserEntry::default();
        op_only.modes.insert('o');
        chan.users.insert("bob".to_owned(), op_only);
        chan.users.insert("carol".to_owned(), UserEntry::default());

        let chan_ref = ChanNameRef::new("#a");
        let mut or_result = s.nicks_in_channel(chan_ref, &['o', 'v'], false);
        or_result.sort();
        assert_eq!(or_result, vec!["carol".to_owned()]);

        let mut and_result = s.nicks_in_channel(chan_ref, &['o', 'v'], true);
        and_result.sort();
        assert_eq!(and_result, vec!["bob".to_owned(), "carol".to_owned()]);
    }
}

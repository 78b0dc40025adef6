//! Consumes parsed frames, mutates [`SessionState`], emits domain events, and
//! queues protocol responses (PING→PONG, CAP negotiation, SASL exchange,
//! nick-in-use mitigation, auto-rejoin, auto-WHO on join).

use std::time::{SystemTime, UNIX_EPOCH};

use irc_common::{ChanName, ChanNameRef};
use irc_wire::{encode, Frame};

use crate::config::Options;
use crate::error::SessionError;
use crate::events::{EventBus, Value};
use crate::state::{SessionState, UserEntry, WhoisData, WhoState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapState {
    #[default]
    None,
    LsOpen,
    Requested,
    Acked,
    End,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct ProtocolHandler<'a> {
    pub state: &'a mut SessionState,
    pub events: &'a mut EventBus,
    pub opt: &'a Options,
    pub cap_state: &'a mut CapState,
    pub cap_ls_buffer: &'a mut Vec<String>,
    pub outgoing: Vec<String>,
}

impl<'a> ProtocolHandler<'a> {
    fn send(&mut self, cmd: &str, args: &[&str]) {
        self.outgoing.push(encode(cmd, args));
    }

    fn emit(&mut self, name: &str, args: &[Value]) -> Result<(), SessionError> {
        self.events.emit(name, args, self.state.requested_disconnect)
    }

    fn is_self(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.state.own_nick)
    }

    fn is_channel(&self, target: &str) -> bool {
        target
            .chars()
            .next()
            .is_some_and(|c| self.state.supported.channel.types.contains(c))
    }

    pub fn handle(&mut self, frame: &Frame) -> Result<(), SessionError> {
        match frame.command.as_str() {
            "rpl_welcome" => self.on_welcome(frame),
            "rpl_myinfo" => self.on_myinfo(frame),
            "rpl_isupport" => self.on_isupport(frame),
            "err_nicknameinuse" => self.on_nick_in_use(frame),
            "PING" => self.on_ping(frame),
            "PONG" => self.on_pong(frame),
            "NOTICE" => self.on_notice_or_privmsg(frame, false),
            "PRIVMSG" => self.on_notice_or_privmsg(frame, true),
            "MODE" => self.on_mode(frame),
            "NICK" => self.on_nick(frame),
            "rpl_motdstart" | "rpl_motd" => self.on_motd_line(frame),
            "rpl_endofmotd" | "err_nomotd" => self.on_motd_end(frame),
            "rpl_topic" => self.on_rpl_topic(frame),
            "rpl_topicwhotime" => self.on_rpl_topicwhotime(frame),
            "TOPIC" => self.on_topic(frame),
            "rpl_channelmodeis" => self.on_channelmodeis(frame),
            "rpl_creationtime" => self.on_creationtime(frame),
            "JOIN" => self.on_join(frame),
            "PART" => self.on_part(frame),
            "KICK" => self.on_kick(frame),
            "KILL" => self.on_kill(frame),
            "QUIT" => self.on_quit(frame),
            "rpl_whoisuser" | "rpl_whoisserver" | "rpl_whoisoperator" | "rpl_whoisidle"
            | "rpl_whoischannels" | "rpl_whoisaccount" | "rpl_away" => self.on_whois_part(frame),
            "rpl_endofwhois" => self.on_endofwhois(frame),
            "rpl_whoreply" | "rpl_whospcrpl" => self.on_who_reply(frame),
            "rpl_endofwho" => self.on_endofwho(frame),
            "rpl_liststart" => {
                self.state.channel_list.clear();
                self.emit("channellist_start", &[])
            }
            "rpl_list" => self.on_list_item(frame),
            "rpl_listend" => self.emit(
                "channellist",
                &[Value::List(
                    self.state
                        .channel_list
                        .iter()
                        .map(|e| e.name.clone())
                        .collect(),
                )],
            ),
            "INVITE" => self.on_invite(frame),
            "CAP" => self.on_cap(frame),
            "AUTHENTICATE" => self.on_authenticate(frame),
            "rpl_loggedin" => {
                log::debug!("account login: {:?}", frame.args);
                Ok(())
            }
            "rpl_saslsuccess" => self.on_sasl_done(true),
            "err_nicklocked" | "err_saslfail" | "err_ssasltoolong" | "err_saslaborted"
            | "err_saslalready" => self.on_sasl_done(false),
            "ACCOUNT" => self.on_account(frame),
            "err_umodeunknownflag" => {
                log::debug!("unknown user mode flag: {:?}", frame.args);
                Ok(())
            }
            "err_erroneusnickname" => self.emit("error", &[Value::from(frame.raw_command.clone())]),
            _ => {
                if frame.command_type == irc_wire::CommandType::Error {
                    self.emit("error", &[Value::from(frame.raw_command.clone())])
                } else {
                    log::debug!("unhandled frame: {frame:?}");
                    Ok(())
                }
            }
        }
    }

    fn on_welcome(&mut self, frame: &Frame) -> Result<(), SessionError> {
        if let Some(nick) = frame.arg(0) {
            self.state.set_own_nick(nick);
        }
        if let Some(text) = frame.arg(1) {
            if let Some(mask) = text.split_whitespace().last() {
                self.state.set_host_mask(mask);
            }
        }
        self.emit("registered", &[])
    }

    fn on_myinfo(&mut self, frame: &Frame) -> Result<(), SessionError> {
        if let Some(usermodes) = frame.arg(3) {
            self.state.supported.usermodes = Some(usermodes.to_owned());
        }
        Ok(())
    }

    fn on_isupport(&mut self, frame: &Frame) -> Result<(), SessionError> {
        if frame.args.len() > 2 {
            let tokens = &frame.args[1..frame.args.len() - 1];
            self.state.absorb_isupport(tokens);
        }
        Ok(())
    }

    fn on_nick_in_use(&mut self, _frame: &Frame) -> Result<(), SessionError> {
        self.state.nick_attempt += 1;
        let candidate = format!("{}{}", self.opt.nick, self.state.nick_attempt);
        self.send("NICK", &[&candidate]);
        Ok(())
    }

    fn on_ping(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let arg = frame.arg(0).unwrap_or("").to_owned();
        self.send("PONG", &[&arg]);
        self.emit("ping", &[Value::from(arg)])
    }

    fn on_pong(&mut self, frame: &Frame) -> Result<(), SessionError> {
        self.emit("pong", &[Value::from(frame.arg(0).unwrap_or("").to_owned())])
    }

    fn on_notice_or_privmsg(&mut self, frame: &Frame, is_privmsg: bool) -> Result<(), SessionError> {
        let target = frame.arg(0).unwrap_or("").to_owned();
        let text = frame.arg(1).unwrap_or("").to_owned();
        let nick = frame.nick.clone().unwrap_or_default();

        if text.starts_with('\u{1}') && text.ends_with('\u{1}') && text.len() >= 2 {
            return self.on_ctcp(&nick, &target, &text[1..text.len() - 1], is_privmsg);
        }

        if !is_privmsg {
            return self.emit(
                "notice",
                &[Value::from(nick), Value::from(target), Value::from(text)],
            );
        }

        self.emit(
            "message",
            &[
                Value::from(nick.clone()),
                Value::from(target.clone()),
                Value::from(text.clone()),
            ],
        )?;

        if self.is_self(&target) {
            return self.emit(
                "pm",
                &[Value::from(nick), Value::from(target), Value::from(text)],
            );
        }

        if self.is_channel(&target) {
            self.emit(
                "message#",
                &[
                    Value::from(nick.clone()),
                    Value::from(target.clone()),
                    Value::from(text.clone()),
                ],
            )?;
            let channel_event = format!("message{}", target.to_lowercase());
            self.emit(&channel_event, &[Value::from(nick), Value::from(target), Value::from(text)])?;
        }
        Ok(())
    }

    fn on_ctcp(
        &mut self,
        nick: &str,
        target: &str,
        payload: &str,
        is_privmsg: bool,
    ) -> Result<(), SessionError> {
        let (ctcp_type, ctcp_text) = match payload.split_once(' ') {
            Some((t, rest)) => (t, rest),
            None => (payload, ""),
        };
        if is_privmsg && ctcp_type.eq_ignore_ascii_case("ACTION") {
            return self.emit(
                "action",
                &[
                    Value::from(nick.to_owned()),
                    Value::from(target.to_owned()),
                    Value::from(ctcp_text.to_owned()),
                ],
            );
        }
        self.emit(
            "ctcp",
            &[
                Value::from(nick.to_owned()),
                Value::from(target.to_owned()),
                Value::from(ctcp_type.to_owned()),
                Value::from(ctcp_text.to_owned()),
            ],
        )
    }

    fn on_mode(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(target) = frame.arg(0) else { return Ok(()) };
        if !self.is_channel(target) {
            log::debug!("ignoring user-mode MODE frame: {frame:?}");
            return Ok(());
        }
        let chan_name: ChanName = target.into();
        let Some(modes) = frame.arg(1) else { return Ok(()) };

        let mut sign = '+';
        let mut arg_cursor = 2;
        let mode_chars: Vec<char> = modes.chars().collect();

        for ch in mode_chars {
            if ch == '+' || ch == '-' {
                sign = ch;
                continue;
            }
            if let Some(&prefix_char) = self.state.prefix_for_mode.get(&ch) {
                let Some(nick) = frame.arg(arg_cursor) else { continue };
                arg_cursor += 1;
                let nick = nick.to_owned();
                if let Some(chan) = self.state.chan_data(&chan_name, false) {
                    let entry = chan.users.entry(nick.clone()).or_default();
                    if sign == '+' {
                        entry.modes.insert(ch);
                    } else {
                        entry.modes.remove(&ch);
                    }
                }
                let event = format!("{sign}mode");
                self.emit(
                    &event,
                    &[
                        Value::from(chan_name.to_string()),
                        Value::from(nick.clone()),
                        Value::from(ch.to_string()),
                    ],
                )?;
                if self.is_self(&nick) {
                    let self_event = format!("{sign}selfmode");
                    self.emit(
                        &self_event,
                        &[Value::from(chan_name.to_string()), Value::from(ch.to_string())],
                    )?;
                }
                let _ = prefix_char;
            } else if matches!(ch, 'b' | 'k' | 'l') {
                let mode_arg = frame.arg(arg_cursor).map(str::to_owned);
                if mode_arg.is_some() {
                    arg_cursor += 1;
                }
                if let Some(chan) = self.state.chan_data(&chan_name, false) {
                    let token = format!("{sign}{ch}");
                    if sign == '+' && !chan.mode.contains(&token) {
                        chan.mode.push_str(&token);
                    } else if sign == '-' {
                        chan.mode = chan.mode.replace(&format!("+{ch}"), "");
                    }
                }
                self.emit(
                    &format!("{sign}mode"),
                    &[
                        Value::from(chan_name.to_string()),
                        Value::from(mode_arg.unwrap_or_default()),
                        Value::from(ch.to_string()),
                    ],
                )?;
            }
        }
        Ok(())
    }

    fn on_nick(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(old_nick) = frame.nick.clone() else { return Ok(()) };
        let Some(new_nick) = frame.arg(0) else { return Ok(()) };
        let new_nick = new_nick.to_owned();

        if self.is_self(&old_nick) {
            self.state.set_own_nick(&new_nick);
            self.emit("selfnick", &[Value::from(new_nick)])?;
            return Ok(());
        }

        let mut channels = Vec::new();
        for (key, chan) in self.state.chans.iter_mut() {
            if let Some(entry) = chan.users.remove(&old_nick) {
                chan.users.insert(new_nick.clone(), entry);
                channels.push(key.clone());
            }
        }
        for key in &channels {
            self.emit(
                &format!("nick{key}"),
                &[Value::from(old_nick.clone()), Value::from(new_nick.clone())],
            )?;
        }
        self.emit(
            "nick",
            &[
                Value::from(old_nick),
                Value::from(new_nick),
                Value::List(channels),
            ],
        )
    }

    fn on_motd_line(&mut self, frame: &Frame) -> Result<(), SessionError> {
        if let Some(line) = frame.args.last() {
            if !self.state.motd_buffer.is_empty() {
                self.state.motd_buffer.push('\n');
            }
            self.state.motd_buffer.push_str(line);
        }
        Ok(())
    }

    fn on_motd_end(&mut self, _frame: &Frame) -> Result<(), SessionError> {
        let motd = self.state.motd_buffer.clone();
        self.emit("motd", &[Value::from(motd)])?;
        for chan in &self.opt.channels {
            self.send("JOIN", &[chan]);
        }
        Ok(())
    }

    fn on_rpl_topic(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(chan_name) = frame.arg(1) else { return Ok(()) };
        let chan_name: ChanName = chan_name.into();
        let topic = frame.args.last().cloned();
        if let Some(chan) = self.state.chan_data(&chan_name, true) {
            chan.topic = topic;
        }
        Ok(())
    }

    fn on_rpl_topicwhotime(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(chan_name) = frame.arg(1) else { return Ok(()) };
        let chan_name: ChanName = chan_name.into();
        let who = frame.arg(2).unwrap_or("").to_owned();
        let mut topic = None;
        if let Some(chan) = self.state.chan_data(&chan_name, true) {
            chan.topic_by = Some(who.clone());
            topic = chan.topic.clone();
        }
        self.emit(
            "topic",
            &[
                Value::from(chan_name.to_string()),
                Value::from(topic.unwrap_or_default()),
                Value::from(who),
            ],
        )
    }

    fn on_topic(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(chan_name) = frame.arg(0) else { return Ok(()) };
        let chan_name: ChanName = chan_name.into();
        let topic = frame.arg(1).unwrap_or("").to_owned();
        let who = frame.nick.clone().unwrap_or_default();
        if let Some(chan) = self.state.chan_data(&chan_name, true) {
            chan.topic = Some(topic.clone());
            chan.topic_by = Some(who.clone());
        }
        self.emit(
            "topic",
            &[Value::from(chan_name.to_string()), Value::from(topic), Value::from(who)],
        )
    }

    fn on_channelmodeis(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(chan_name) = frame.arg(1) else { return Ok(()) };
        let chan_name: ChanName = chan_name.into();
        let mode = frame.arg(2).unwrap_or("").to_owned();
        if let Some(chan) = self.state.chan_data(&chan_name, true) {
            chan.mode = mode;
        }
        Ok(())
    }

    fn on_creationtime(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(chan_name) = frame.arg(1) else { return Ok(()) };
        let chan_name: ChanName = chan_name.into();
        let created = frame.arg(2).map(str::to_owned);
        if let Some(chan) = self.state.chan_data(&chan_name, true) {
            chan.created = created;
        }
        Ok(())
    }

    fn on_join(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(chan_arg) = frame.arg(0) else { return Ok(()) };
        let chan_name: ChanName = chan_arg.into();
        let nick = frame.nick.clone().unwrap_or_default();
        let is_self = self.is_self(&nick);

        let extended_join = self.state.capabilities.contains("extended-join");
        let account = if extended_join { frame.arg(1).map(str::to_owned) } else { None };

        {
            let user = frame.user.clone();
            let host = frame.host.clone();
            let chan = self.state.chan_data(&chan_name, true).unwrap();
            let entry = chan.users.entry(nick.clone()).or_default();
            entry.username = user;
            entry.host = host;
            if extended_join {
                entry.account = account.clone();
                entry.is_registered = Some(true);
            }
        }

        if is_self {
            self.state.sync_chans.insert(chan_name.to_string(), now_ms());
            self.send("MODE", &[chan_name.as_str()]);
            let format = if self.state.supported.whox {
                "%cuhnfa"
            } else {
                ""
            };
            self.enqueue_who(chan_name.as_str(), format);
            self.emit("selfjoin", &[Value::from(chan_name.to_string())])?;
            self.emit(
                &format!("selfjoin{}", chan_name.as_str().to_lowercase()),
                &[Value::from(chan_name.to_string())],
            )?;
        }

        self.emit("join", &[Value::from(chan_name.to_string()), Value::from(nick.clone())])?;
        self.emit(
            &format!("join{}", chan_name.as_str().to_lowercase()),
            &[Value::from(chan_name.to_string()), Value::from(nick)],
        )
    }

    fn enqueue_who(&mut self, target: &str, format: &str) {
        let sort_format = if format.is_empty() { "%cuhsnfdr" } else { format };
        self.state
            .who
            .entry(target.to_owned())
            .or_insert_with(WhoState::default)
            .queue
            .push_back(sort_format.to_owned());
        if format.is_empty() {
            self.send("WHO", &[target]);
        } else {
            self.send("WHO", &[target, format]);
        }
    }

    fn on_part(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(chan_arg) = frame.arg(0) else { return Ok(()) };
        let chan_name: ChanName = chan_arg.into();
        let nick = frame.nick.clone().unwrap_or_default();
        let is_self = self.is_self(&nick);

        self.emit("part", &[Value::from(chan_name.to_string()), Value::from(nick.clone())])?;
        self.emit(
            &format!("part{}", chan_name.as_str().to_lowercase()),
            &[Value::from(chan_name.to_string()), Value::from(nick.clone())],
        )?;
        if is_self {
            self.state.chans.remove(&chan_name.key());
            self.emit("selfpart", &[Value::from(chan_name.to_string())])
        } else {
            if let Some(chan) = self.state.chan_data(&chan_name, false) {
                chan.users.remove(&nick);
            }
            Ok(())
        }
    }

    fn on_kick(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(chan_arg) = frame.arg(0) else { return Ok(()) };
        let chan_name: ChanName = chan_arg.into();
        let target = frame.arg(1).unwrap_or("").to_owned();
        let by = frame.nick.clone().unwrap_or_default();
        let is_self = self.is_self(&target);

        self.emit(
            "kick",
            &[Value::from(chan_name.to_string()), Value::from(target.clone()), Value::from(by)],
        )?;

        if is_self {
            self.state.chans.remove(&chan_name.key());
            self.emit("selfkick", &[Value::from(chan_name.to_string())])?;
            if self.opt.auto_rejoin {
                self.send("JOIN", &[chan_name.as_str()]);
            }
        } else if let Some(chan) = self.state.chan_data(&chan_name, false) {
            chan.users.remove(&target);
        }
        Ok(())
    }

    fn on_kill(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(nick) = frame.nick.clone() else { return Ok(()) };
        let channels = self.state.nick_in_channels(&nick, true);
        for key in &channels {
            self.emit(&format!("kill{key}"), &[Value::from(nick.clone())])?;
        }
        self.emit("kill", &[Value::from(nick), Value::List(channels)])
    }

    fn on_quit(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(nick) = frame.nick.clone() else { return Ok(()) };
        if self.is_self(&nick) {
            return Ok(());
        }
        let reason = frame.arg(0).unwrap_or("").to_owned();
        let changing_host = reason == "Changing host";

        let channels = if changing_host {
            self.state.nick_in_channels(&nick, false)
        } else {
            self.state.nick_in_channels(&nick, true)
        };

        for key in &channels {
            self.emit(
                &format!("quit{key}"),
                &[Value::from(nick.clone()), Value::from(reason.clone())],
            )?;
        }
        self.emit(
            "quit",
            &[Value::from(nick.clone()), Value::from(reason.clone()), Value::List(channels.clone())],
        )?;

        if !changing_host {
            for key in &channels {
                self.emit(
                    &format!("realquit{key}"),
                    &[Value::from(nick.clone()), Value::from(reason.clone())],
                )?;
            }
            self.emit("realquit", &[Value::from(nick), Value::from(reason), Value::List(channels)])?;
        }
        Ok(())
    }

    fn on_whois_part(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(nick) = frame.arg(1) else { return Ok(()) };
        let nick = nick.to_owned();

        if frame.command == "rpl_away" && !self.state.whois_data.contains_key(&nick) {
            return Ok(());
        }

        let data = self.state.whois_data.entry(nick.clone()).or_default();
        data.nick = Some(nick);
        match frame.command.as_str() {
            "rpl_whoisuser" => {
                data.user = frame.arg(2).map(str::to_owned);
                data.host = frame.arg(3).map(str::to_owned);
                data.realname = frame.args.last().cloned();
            }
            "rpl_whoisserver" => {
                data.server = frame.arg(2).map(str::to_owned);
                data.serverinfo = frame.args.last().cloned();
            }
            "rpl_whoisoperator" => data.operator = true,
            "rpl_whoisidle" => data.idle = frame.arg(2).map(str::to_owned),
            "rpl_whoischannels" => {
                data.channels = frame
                    .args
                    .last()
                    .map(|s| s.split_whitespace().map(str::to_owned).collect())
                    .unwrap_or_default();
            }
            "rpl_whoisaccount" => {
                data.account = frame.arg(2).map(str::to_owned);
                data.accountinfo = frame.args.last().cloned();
            }
            "rpl_away" => data.away = true,
            _ => {}
        }
        Ok(())
    }

    fn on_endofwhois(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(nick) = frame.arg(1) else { return Ok(()) };
        let mut data = self.state.whois_data.remove(nick).unwrap_or_default();
        data.nick = Some(nick.to_owned());
        self.emit(
            "whois",
            &[
                Value::from(data.nick.clone().unwrap_or_default()),
                Value::from(data.user.unwrap_or_default()),
                Value::from(data.host.unwrap_or_default()),
                Value::from(data.realname.unwrap_or_default()),
                Value::from(data.account.unwrap_or_default()),
                Value::Bool(data.away),
                Value::List(data.channels),
            ],
        )
    }

    fn on_who_reply(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(target) = frame.arg(0) else { return Ok(()) };
        let row: Vec<String> = frame.args[1..].to_vec();
        self.state
            .who
            .entry(target.to_owned())
            .or_insert_with(WhoState::default)
            .data
            .push(row);
        Ok(())
    }

    fn on_endofwho(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(target) = frame.arg(0) else { return Ok(()) };
        let target = target.to_owned();
        let whox = self.state.supported.whox;

        let Some(who_state) = self.state.who.get_mut(&target) else {
            log::debug!("rpl_endofwho with no pending WHO for {target}");
            return self.emit("who", &[Value::from(target.clone()), Value::List(Vec::new())]);
        };
        let Some(format) = who_state.queue.pop_front() else {
            log::debug!("rpl_endofwho queue underflow for {target}");
            return self.emit("who", &[Value::from(target.clone()), Value::List(Vec::new())]);
        };
        let rows = std::mem::take(&mut who_state.data);

        let fields: Vec<char> = if whox {
            format.trim_start_matches('%').chars().collect()
        } else {
            vec!['c', 'u', 'h', 's', 'n', 'f', 'd', 'r']
        };

        let mut records = Vec::new();
        for mut row in rows {
            if !whox {
                // 7th field ("H@" style) splits into hops (first char) and
                // realname (remainder after a space).
                if let Some(seventh) = row.get(6).cloned() {
                    let mut hops = String::new();
                    let mut realname = String::new();
                    let mut chars = seventh.chars();
                    if let Some(first) = chars.next() {
                        hops.push(first);
                    }
                    realname.push_str(chars.as_str().trim_start());
                    row.truncate(6);
                    row.push(hops);
                    row.push(realname);
                }
            }
            if row.len() != fields.len() {
                log::debug!("rpl_endofwho column mismatch for {target}: {row:?}");
                continue;
            }
            let mut record: std::collections::HashMap<&str, String> = std::collections::HashMap::new();
            for (f, v) in fields.iter().zip(row.into_iter()) {
                let name = field_name(*f);
                record.insert(name, v);
            }
            records.push(record);
        }

        if let Some(chan) = self.state.chans.get_mut(&ChanNameRef::new(&target).key()) {
            chan.users.clear();
            for record in &records {
                let Some(nick) = record.get("n") else { continue };
                let mut entry = UserEntry::default();
                entry.username = record.get("u").cloned();
                entry.host = record.get("h").cloned();
                if let Some(status) = record.get("f") {
                    let mut chars = status.chars();
                    if let Some(first) = chars.next() {
                        entry.away = Some(first == 'G');
                    }
                    for m in chars {
                        if let Some(&mode) = self.state.mode_for_prefix.get(&m) {
                            entry.modes.insert(mode);
                        }
                    }
                }
                if let Some(account) = record.get("a") {
                    if account == "0" {
                        entry.account = None;
                        entry.is_registered = Some(false);
                    } else {
                        entry.account = Some(account.clone());
                        entry.is_registered = Some(true);
                    }
                }
                chan.users.insert(nick.clone(), entry);
            }
        }

        let result_list: Vec<String> = records
            .iter()
            .filter_map(|r| r.get("n").cloned())
            .collect();
        self.emit(
            &format!("who{target}"),
            &[Value::from(target.clone()), Value::List(result_list.clone())],
        )?;
        self.emit("who", &[Value::from(target.clone()), Value::List(result_list)])?;

        if self.state.sync_chans.remove(&target).is_some() {
            self.emit("joinsync", &[Value::from(target)])?;
        }
        Ok(())
    }

    fn on_list_item(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let name = frame.arg(1).unwrap_or("").to_owned();
        let users = frame.arg(2).map(str::to_owned);
        let topic = frame.args.last().cloned();
        self.state
            .channel_list
            .push(crate::state::ChannelListEntry { name: name.clone(), users, topic: topic.clone() });
        self.emit(
            "channellist_item",
            &[Value::from(name), Value::from(topic.unwrap_or_default())],
        )
    }

    fn on_invite(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let channel = frame.arg(1).unwrap_or("").to_owned();
        let from = frame.nick.clone().unwrap_or_default();
        self.emit("invite", &[Value::from(channel), Value::from(from)])
    }

    fn on_cap(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let subcommand = frame.arg(1).unwrap_or("");
        match subcommand {
            "LS" => {
                let is_multiline = frame.arg(2) == Some("*");
                let caps_arg = if is_multiline { frame.arg(3) } else { frame.arg(2) };
                if let Some(caps) = caps_arg {
                    self.cap_ls_buffer.extend(caps.split_whitespace().map(str::to_owned));
                }
                if is_multiline {
                    *self.cap_state = CapState::LsOpen;
                    return Ok(());
                }
                for (name, value) in self.cap_ls_buffer.clone().iter().filter_map(|tok| {
                    let (n, v) = match tok.split_once('=') {
                        Some((n, v)) => (n.to_owned(), Some(v.to_owned())),
                        None => (tok.clone(), None),
                    };
                    Some((n, v))
                }) {
                    self.state.supported.capabilities.insert(name, value);
                }
                self.emit("cap-ls", &[])?;

                let mut wanted: Vec<String> = self
                    .opt
                    .capabilities
                    .iter()
                    .filter(|c| self.state.supported.capabilities.contains_key(*c))
                    .cloned()
                    .collect();
                if self.opt.sasl && !wanted.iter().any(|c| c == "sasl") {
                    wanted.push("sasl".to_owned());
                }
                wanted.sort();
                wanted.dedup();
                self.state.pending_cap_req = wanted.clone();
                if !wanted.is_empty() {
                    *self.cap_state = CapState::Requested;
                    self.send("CAP", &["REQ", &wanted.join(" ")]);
                } else {
                    self.send_cap_end()?;
                }
                Ok(())
            }
            "ACK" => {
                let acked: Vec<String> = frame
                    .args
                    .last()
                    .map(|s| s.split_whitespace().map(str::to_owned).collect())
                    .unwrap_or_default();
                for cap in &acked {
                    self.state.pending_cap_req.retain(|c| c != cap);
                    self.state.capabilities.insert(cap.clone());
                }
                if self.state.pending_cap_req.is_empty() {
                    *self.cap_state = CapState::Acked;
                    if self.opt.sasl {
                        self.send("AUTHENTICATE", &["PLAIN"]);
                    } else {
                        self.send_cap_end()?;
                    }
                }
                Ok(())
            }
            "NAK" => {
                let naked: Vec<String> = frame
                    .args
                    .last()
                    .map(|s| s.split_whitespace().map(str::to_owned).collect())
                    .unwrap_or_default();
                self.state.pending_cap_req.retain(|c| !naked.contains(c));
                if self.state.pending_cap_req.is_empty() {
                    self.send_cap_end()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn send_cap_end(&mut self) -> Result<(), SessionError> {
        *self.cap_state = CapState::End;
        self.send("CAP", &["END"]);
        self.emit("cap-end", &[])?;
        self.emit("connect", &[])
    }

    fn on_authenticate(&mut self, frame: &Frame) -> Result<(), SessionError> {
        if frame.arg(0) == Some("+") {
            let user = &self.opt.user_name;
            let pass = self.opt.password.clone().unwrap_or_default();
            let payload = format!("{user}\0{user}\0{pass}");
            let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, payload);
            self.send("AUTHENTICATE", &[&encoded]);
        }
        Ok(())
    }

    fn on_sasl_done(&mut self, success: bool) -> Result<(), SessionError> {
        if success {
            self.emit("sasl-authenticated", &[])?;
        } else {
            self.emit("sasl-authentication-failed", &[])?;
        }
        self.send_cap_end()
    }

    fn on_account(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let Some(nick) = frame.nick.clone() else { return Ok(()) };
        let account = frame.arg(0).unwrap_or("").to_owned();
        let (is_registered, account_value) = if account == "*" || account == "0" {
            (false, None)
        } else {
            (true, Some(account))
        };
        for chan in self.state.chans.values_mut() {
            if let Some(user) = chan.users.get_mut(&nick) {
                user.is_registered = Some(is_registered);
                user.account = account_value.clone();
            }
        }
        Ok(())
    }
}

fn field_name(letter: char) -> &'static str {
    match letter {
        't' => "t",
        'c' => "c",
        'u' => "u",
        'i' => "i",
        'h' => "h",
        's' => "s",
        'n' => "n",
        'f' => "f",
        'd' => "d",
        'l' => "l",
        'a' => "a",
        'r' => "r",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use irc_wire::parse_frame;

    fn handler<'a>(
        state: &'a mut SessionState,
        events: &'a mut EventBus,
        opt: &'a Options,
        cap_state: &'a mut CapState,
        cap_ls_buffer: &'a mut Vec<String>,
    ) -> ProtocolHandler<'a> {
        ProtocolHandler {
            state,
            events,
            opt,
            cap_state,
            cap_ls_buffer,
            outgoing: Vec::new(),
        }
    }

    #[test]
    fn welcome_sets_nick_and_hostmask() {
        let mut state = SessionState::new("nick", "&#");
        let mut events = EventBus::new();
        let opt = Options::new("irc.example.org", "nick");
        let mut cap_state = CapState::None;
        let mut buf = Vec::new();
        let mut h = handler(&mut state, &mut events, &opt, &mut cap_state, &mut buf);
        let frame = parse_frame(":srv 001 nick :Welcome to IRC nick!u@h.example", false);
        h.handle(&frame).unwrap();
        assert_eq!(state.own_nick, "nick");
        assert_eq!(state.host_mask, "nick!u@h.example");
        assert_eq!(state.max_line_length, 497 - 4 - 16);
    }

    #[test]
    fn ping_triggers_pong() {
        let mut state = SessionState::new("nick", "&#");
        let mut events = EventBus::new();
        let opt = Options::new("irc.example.org", "nick");
        let mut cap_state = CapState::None;
        let mut buf = Vec::new();
        let mut h = handler(&mut state, &mut events, &opt, &mut cap_state, &mut buf);
        let frame = parse_frame("PING :abc", false);
        h.handle(&frame).unwrap();
        assert_eq!(h.outgoing, vec!["PONG :abc\r\n".to_owned()]);
    }

    #[test]
    fn nick_in_use_escalates_with_suffix() {
        let mut state = SessionState::new("nick", "&#");
        let mut events = EventBus::new();
        let opt = Options::new("irc.example.org", "nick");
        let mut cap_state = CapState::None;
        let mut buf = Vec::new();
        let frame = parse_frame(":srv 433 * nick :Nickname is already in use", false);
        {
            let mut h = handler(&mut state, &mut events, &opt, &mut cap_state, &mut buf);
            h.handle(&frame).unwrap();
            assert_eq!(h.outgoing, vec!["NICK nick1\r\n".to_owned()]);
        }
        let mut h = handler(&mut state, &mut events, &opt, &mut cap_state, &mut buf);
        h.handle(&frame).unwrap();
        assert_eq!(h.outgoing, vec!["NICK nick2\r\n".to_owned()]);
    }

    #[test]
    fn nick_rekeys_channel_membership() {
        let mut state = SessionState::new("self", "&#");
        {
            let a: ChanName = "#a".into();
            let chan = state.chan_data(&a, true).unwrap();
            chan.users.insert("old".to_owned(), UserEntry::default());
        }
        {
            let b: ChanName = "#b".into();
            let chan = state.chan_data(&b, true).unwrap();
            chan.users.insert("old".to_owned(), UserEntry::default());
        }
        let mut events = EventBus::new();
        let opt = Options::new("irc.example.org", "self");
        let mut cap_state = CapState::None;
        let mut buf = Vec::new();
        let mut h = handler(&mut state, &mut events, &opt, &mut cap_state, &mut buf);
        let frame = parse_frame(":old!u@h NICK :new", false);
        h.handle(&frame).unwrap();
        assert!(state.chans["#a"].users.contains_key("new"));
        assert!(!state.chans["#a"].users.contains_key("old"));
        assert!(state.chans["#b"].users.contains_key("new"));
    }

    #[test]
    fn quit_changing_host_keeps_membership() {
        let mut state = SessionState::new("self", "&#");
        {
            let a: ChanName = "#a".into();
            let chan = state.chan_data(&a, true).unwrap();
            chan.users.insert("bob".to_owned(), UserEntry::default());
        }
        let mut events = EventBus::new();
        let mut realquit_fired = std::rc::Rc::new(std::cell::RefCell::new(false));
        let rq = realquit_fired.clone();
        events.on("realquit", move |_| *rq.borrow_mut() = true);
        let opt = Options::new("irc.example.org", "self");
        let mut cap_state = CapState::None;
        let mut buf = Vec::new();
        let mut h = handler(&mut state, &mut events, &opt, &mut cap_state, &mut buf);
        let frame = parse_frame(":bob!u@h QUIT :Changing host", false);
        h.handle(&frame).unwrap();
        assert!(state.chans["#a"].users.contains_key("bob"));
        assert!(!*realquit_fired.borrow());
    }

    #[test]
    fn cap_flow_requests_and_authenticates() {
        let mut state = SessionState::new("nick", "&#");
        let mut events = EventBus::new();
        let mut opt = Options::new("irc.example.org", "nick");
        opt.sasl = true;
        opt.capabilities = vec!["multi-prefix".to_owned()];
        opt.password = Some("p".to_owned());
        let mut cap_state = CapState::None;
        let mut buf = Vec::new();

        let ls = parse_frame(":srv CAP * LS :sasl multi-prefix", false);
        let mut h = handler(&mut state, &mut events, &opt, &mut cap_state, &mut buf);
        h.handle(&ls).unwrap();
        assert_eq!(h.outgoing, vec!["CAP REQ :multi-prefix sasl\r\n".to_owned()]);

        let ack = parse_frame(":srv CAP * ACK :multi-prefix sasl", false);
        let mut h = handler(&mut state, &mut events, &opt, &mut cap_state, &mut buf);
        h.handle(&ack).unwrap();
        assert_eq!(h.outgoing, vec!["AUTHENTICATE PLAIN\r\n".to_owned()]);

        let plus = parse_frame("AUTHENTICATE +", false);
        let mut h = handler(&mut state, &mut events, &opt, &mut cap_state, &mut buf);
        h.handle(&plus).unwrap();
        assert_eq!(h.outgoing.len(), 1);
        assert!(h.outgoing[0].starts_with("AUTHENTICATE "));
    }
}

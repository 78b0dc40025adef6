//! Session configuration. Mirrors the option table a caller fills in before
//! connecting; every field has the default the table specifies so a caller
//! can start from `Options::new(server, nick)` and override only what it
//! needs.

#[derive(Debug, Clone, Default)]
pub struct WebIrc {
    pub pass: String,
    pub ip: String,
    pub user: String,
}

impl WebIrc {
    fn is_set(&self) -> bool {
        !self.pass.is_empty() && !self.ip.is_empty() && !self.user.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum Secure {
    No,
    Plain,
    Tls { self_signed: bool, cert_expired: bool },
}

impl Default for Secure {
    fn default() -> Self {
        Secure::No
    }
}

impl Secure {
    pub fn enabled(&self) -> bool {
        !matches!(self, Secure::No)
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub server: String,
    pub nick: String,
    pub password: Option<String>,
    pub user_name: String,
    pub real_name: String,
    pub port: u16,
    pub local_address: Option<String>,
    pub debug: bool,
    pub show_errors: bool,
    pub auto_rejoin: bool,
    pub auto_connect: bool,
    pub channels: Vec<String>,
    pub retry_count: Option<u32>,
    pub retry_delay_ms: u64,
    pub secure: Secure,
    pub flood_protection: bool,
    pub flood_protection_delay_ms: u64,
    pub sasl: bool,
    pub capabilities: Vec<String>,
    pub strip_colors: bool,
    pub channel_prefixes: String,
    pub message_split: usize,
    pub webirc: WebIrc,
}

impl Options {
    pub fn new(server: impl Into<String>, nick: impl Into<String>) -> Self {
        Options {
            server: server.into(),
            nick: nick.into(),
            password: None,
            user_name: "nodebot".to_owned(),
            real_name: "nodeJS IRC client".to_owned(),
            port: 6667,
            local_address: None,
            debug: false,
            show_errors: false,
            auto_rejoin: false,
            auto_connect: true,
            channels: Vec::new(),
            retry_count: None,
            retry_delay_ms: 2000,
            secure: Secure::No,
            flood_protection: false,
            flood_protection_delay_ms: 1000,
            sasl: false,
            capabilities: Vec::new(),
            strip_colors: false,
            channel_prefixes: "&#".to_owned(),
            message_split: 512,
            webirc: WebIrc::default(),
        }
    }

    pub fn webirc_line(&self) -> Option<String> {
        self.webirc.is_set().then(|| {
            irc_wire::encode(
                "WEBIRC",
                &[&self.webirc.pass, &self.user_name, &self.webirc.ip, &self.webirc.user],
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_option_table() {
        let opt = Options::new("irc.example.org", "nick");
        assert_eq!(opt.port, 6667);
        assert_eq!(opt.user_name, "nodebot");
        assert_eq!(opt.real_name, "nodeJS IRC client");
        assert_eq!(opt.retry_delay_ms, 2000);
        assert_eq!(opt.flood_protection_delay_ms, 1000);
        assert_eq!(opt.channel_prefixes, "&#");
        assert_eq!(opt.message_split, 512);
        assert!(opt.retry_count.is_none());
        assert!(!opt.sasl);
    }

    #[test]
    fn webirc_requires_all_three_fields() {
        let mut opt = Options::new("s", "n");
        assert!(opt.webirc_line().is_none());
        opt.webirc = WebIrc {
            pass: "p".into(),
            ip: "1.2.3.4".into(),
            user: "h".into(),
        };
        assert!(opt.webirc_line().unwrap().starts_with("WEBIRC "));
    }
}

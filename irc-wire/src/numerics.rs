#![allow(clippy::zero_prefixed_literal)]
//! Numeric reply → symbolic name table (RFC 1459/2812 plus the extensions
//! this engine understands: SASL's 900–907, WHOX's 354). Only numerics the
//! rest of the workspace has a use for are named; anything else keeps its
//! digits as `Frame::command`.

pub fn symbolic_name(num: u16) -> Option<&'static str> {
    Some(match num {
        001 => "rpl_welcome",
        002 => "rpl_yourhost",
        003 => "rpl_created",
        004 => "rpl_myinfo",
        005 => "rpl_isupport",
        301 => "rpl_away",
        302 => "rpl_userhost",
        305 => "rpl_unaway",
        306 => "rpl_nowaway",
        311 => "rpl_whoisuser",
        312 => "rpl_whoisserver",
        313 => "rpl_whoisoperator",
        314 => "rpl_whowasuser",
        315 => "rpl_endofwho",
        317 => "rpl_whoisidle",
        318 => "rpl_endofwhois",
        319 => "rpl_whoischannels",
        321 => "rpl_liststart",
        322 => "rpl_list",
        323 => "rpl_listend",
        324 => "rpl_channelmodeis",
        329 => "rpl_creationtime",
        330 => "rpl_whoisaccount",
        331 => "rpl_notopic",
        332 => "rpl_topic",
        333 => "rpl_topicwhotime",
        338 => "rpl_whoisactually",
        341 => "rpl_inviting",
        346 => "rpl_invitelist",
        347 => "rpl_endofinvitelist",
        348 => "rpl_exceptlist",
        349 => "rpl_endofexceptlist",
        352 => "rpl_whoreply",
        353 => "rpl_namreply",
        354 => "rpl_whospcrpl",
        366 => "rpl_endofnames",
        367 => "rpl_banlist",
        368 => "rpl_endofbanlist",
        369 => "rpl_endofwhowas",
        371 => "rpl_info",
        372 => "rpl_motd",
        374 => "rpl_endofinfo",
        375 => "rpl_motdstart",
        376 => "rpl_endofmotd",
        379 => "rpl_whoismodes",
        381 => "rpl_youreoper",
        391 => "rpl_time",
        396 => "rpl_hostcloaked",
        401 => "err_nosuchnick",
        402 => "err_nosuchserver",
        403 => "err_nosuchchannel",
        404 => "err_cannotsendtochan",
        405 => "err_toomanychannels",
        406 => "err_wasnosuchnick",
        421 => "err_unknowncommand",
        422 => "err_nomotd",
        431 => "err_nonicknamegiven",
        432 => "err_erroneusnickname",
        433 => "err_nicknameinuse",
        436 => "err_nickcollision",
        441 => "err_usernotinchannel",
        442 => "err_notonchannel",
        443 => "err_useronchannel",
        444 => "err_nologin",
        451 => "err_notregistered",
        461 => "err_needmoreparams",
        462 => "err_alreadyregistered",
        464 => "err_passwdmismatch",
        465 => "err_yourebannedcreep",
        471 => "err_channelisfull",
        472 => "err_unknownmode",
        473 => "err_inviteonlychan",
        474 => "err_bannedfromchan",
        475 => "err_badchannelkey",
        476 => "err_badchanmask",
        477 => "err_needreggednick",
        481 => "err_noprivileges",
        482 => "err_chanoprivsneeded",
        483 => "err_cantkillserver",
        501 => "err_umodeunknownflag",
        502 => "err_usersdontmatch",
        671 => "rpl_whoissecure",
        900 => "rpl_loggedin",
        901 => "rpl_loggedout",
        902 => "err_nicklocked",
        903 => "rpl_saslsuccess",
        904 => "err_saslfail",
        905 => "err_ssasltoolong",
        906 => "err_saslaborted",
        907 => "err_saslalready",
        908 => "rpl_saslmechs",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_welcome_and_nicknameinuse() {
        assert_eq!(symbolic_name(1), Some("rpl_welcome"));
        assert_eq!(symbolic_name(433), Some("err_nicknameinuse"));
    }

    #[test]
    fn unknown_numeric_is_none() {
        assert_eq!(symbolic_name(999), None);
    }
}

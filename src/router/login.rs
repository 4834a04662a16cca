use md5::{Digest, Md5};
use sha2::Sha256;
use tracing::{debug, info};

use super::{Response, Router, Session, Transport};
use crate::error::RouterError;

const LOGIN_ENDPOINT: &str = "login_sid.lua";
/// Asks FRITZ!OS 7.24+ for a PBKDF2 challenge; older firmware ignores it.
const LOGIN_QUERY: [(&str, &str); 1] = [("version", "2")];

pub const SID_NOAUTH: &str = "0000000000000000";

/// Highest PBKDF2 round count accepted from a challenge; the box sends
/// tens of thousands at most.
const MAX_PBKDF2_ITERATIONS: u32 = 1_000_000;

/// Challenge-response scheme, chosen by the shape of the challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginScheme {
    /// Legacy firmware: `<challenge>-md5(utf16le("<challenge>-<password>"))`.
    Md5 { challenge: String },
    /// `2$<iter1>$<salt1>$<iter2>$<salt2>`
    Pbkdf2 {
        iter1: u32,
        salt1: Vec<u8>,
        iter2: u32,
        salt2: Vec<u8>,
        /// `salt2` as sent, echoed back in the response
        salt2_hex: String,
    },
}

impl LoginScheme {
    pub fn from_challenge(challenge: &str) -> Result<LoginScheme, RouterError> {
        let Some(params) = challenge.strip_prefix("2$") else {
            if challenge.is_empty() {
                return Err(RouterError::protocol(LOGIN_ENDPOINT, "empty challenge"));
            }
            return Ok(LoginScheme::Md5 {
                challenge: challenge.to_string(),
            });
        };

        let bad = |what: &str| RouterError::protocol(LOGIN_ENDPOINT, format!("{what} in PBKDF2 challenge"));
        let parts: Vec<&str> = params.split('$').collect();
        let [iter1, salt1, iter2, salt2] = parts[..] else {
            return Err(bad("wrong field count"));
        };

        let rounds = |text: &str| match text.parse::<u32>() {
            Ok(n) if (1..=MAX_PBKDF2_ITERATIONS).contains(&n) => Ok(n),
            _ => Err(bad("bad iteration count")),
        };

        Ok(LoginScheme::Pbkdf2 {
            iter1: rounds(iter1)?,
            salt1: hex::decode(salt1).map_err(|_| bad("bad salt"))?,
            iter2: rounds(iter2)?,
            salt2: hex::decode(salt2).map_err(|_| bad("bad salt"))?,
            salt2_hex: salt2.to_string(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoginScheme::Md5 { .. } => "md5",
            LoginScheme::Pbkdf2 { .. } => "pbkdf2",
        }
    }

    /// Computes the `response` form value for `password`.
    pub fn response(&self, password: &str) -> String {
        match self {
            LoginScheme::Md5 { challenge } => md5_response(challenge, password),
            LoginScheme::Pbkdf2 {
                iter1,
                salt1,
                iter2,
                salt2,
                salt2_hex,
            } => pbkdf2_response(*iter1, salt1, *iter2, salt2, password, salt2_hex),
        }
    }
}

fn md5_response(challenge: &str, password: &str) -> String {
    // the box hashes UTF-16LE and substitutes '.' for anything past Latin-1
    let text = format!("{challenge}-{password}");
    let bytes: Vec<u8> = text
        .chars()
        .map(|c| if u32::from(c) > 0xff { '.' } else { c })
        .flat_map(|c| (u32::from(c) as u16).to_le_bytes())
        .collect();

    format!("{challenge}-{}", hex::encode(Md5::digest(&bytes)))
}

fn pbkdf2_response(
    iter1: u32,
    salt1: &[u8],
    iter2: u32,
    salt2: &[u8],
    password: &str,
    salt2_hex: &str,
) -> String {
    let mut first = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt1, iter1, &mut first);
    let mut second = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(&first, salt2, iter2, &mut second);

    format!("{salt2_hex}${}", hex::encode(second))
}

/// Fields of the `SessionInfo` document we act on.
#[derive(Debug, PartialEq, Eq)]
struct SessionInfo {
    sid: String,
    challenge: String,
    block_time: u32,
}

impl SessionInfo {
    fn parse(response: &Response) -> Result<SessionInfo, RouterError> {
        if !response.is_success() {
            return Err(RouterError::Request {
                endpoint: LOGIN_ENDPOINT,
                status: response.status,
            });
        }

        let doc = roxmltree::Document::parse(&response.body)
            .map_err(|err| RouterError::protocol(LOGIN_ENDPOINT, format!("not XML: {err}")))?;
        let text = |tag: &str| {
            doc.descendants()
                .find(|node| node.has_tag_name(tag))
                .map(|node| node.text().unwrap_or_default().trim().to_string())
        };

        let sid = text("SID").ok_or_else(|| RouterError::protocol(LOGIN_ENDPOINT, "no SID element"))?;
        let challenge = text("Challenge")
            .ok_or_else(|| RouterError::protocol(LOGIN_ENDPOINT, "no Challenge element"))?;
        let block_time = match text("BlockTime") {
            None => 0,
            Some(value) => value
                .parse()
                .map_err(|_| RouterError::protocol(LOGIN_ENDPOINT, format!("bad BlockTime '{value}'")))?,
        };

        Ok(SessionInfo {
            sid,
            challenge,
            block_time,
        })
    }
}

impl<T: Transport> Router<T> {
    /// Logs in and returns the session id issued by the box.
    pub fn login(&self, username: &str, password: &str) -> Result<Session, RouterError> {
        let url = self.url(LOGIN_ENDPOINT);

        let info = SessionInfo::parse(&self.transport.get(&url, &LOGIN_QUERY)?)?;
        if info.block_time > 0 {
            return Err(RouterError::Blocked(info.block_time));
        }

        let scheme = LoginScheme::from_challenge(&info.challenge)?;
        debug!(scheme = scheme.name(), "received login challenge");

        let response = scheme.response(password);
        let reply = self.transport.post_form(
            &format!("{url}?version=2"),
            &[("username", username), ("response", response.as_str())],
        )?;

        let info = SessionInfo::parse(&reply)?;
        if info.sid.is_empty() || info.sid == SID_NOAUTH {
            return Err(RouterError::Authentication);
        }

        let session = Session(info.sid);
        info!(%session, username, "logged in");
        Ok(session)
    }
}

#[cfg(test)]
use super::fake::{session_info, ScriptedRouter};

#[test]
fn test_md5_scheme() {
    let scheme = LoginScheme::from_challenge("1234567z").unwrap();
    assert_eq!(scheme.name(), "md5");
    assert_eq!(
        scheme.response("äbc"),
        "1234567z-9e224a41eeefa284df7bb0f26c2913e2"
    );
}

#[test]
fn test_md5_replaces_wide_characters() {
    let scheme = LoginScheme::from_challenge("1234567z").unwrap();
    assert_eq!(scheme.response("€bc"), scheme.response(".bc"));
}

#[test]
fn test_pbkdf2_scheme() {
    let scheme = LoginScheme::from_challenge("2$10000$5A1711$2000$5A1722").unwrap();
    assert_eq!(
        scheme,
        LoginScheme::Pbkdf2 {
            iter1: 10000,
            salt1: vec![0x5a, 0x17, 0x11],
            iter2: 2000,
            salt2: vec![0x5a, 0x17, 0x22],
            salt2_hex: "5A1722".to_string(),
        }
    );
    assert_eq!(
        scheme.response("1example!"),
        "5A1722$1798a1672bca7c6463d6b245f82b53703b0f50813401b03e4045a5861e689adb"
    );
}

#[test]
fn test_pbkdf2_challenge_garbled() {
    for challenge in [
        "2$10000$5A1711$2000",
        "2$many$5A1711$2000$5A1722",
        "2$1$zz$1$5A",
        "2$4294967295$5A1711$2000$5A1722",
        "2$10000$5A1711$1000001$5A1722",
        "2$0$5A1711$2000$5A1722",
    ] {
        assert!(matches!(
            LoginScheme::from_challenge(challenge),
            Err(RouterError::Protocol { .. })
        ));
    }
}

#[test]
fn test_login_returns_session() {
    let router = ScriptedRouter::new()
        .reply_xml(&session_info(SID_NOAUTH, "1234567z", 0))
        .reply_xml(&session_info("a1b2c3d4e5f60718", "1234567z", 0));

    let session = Router::new("fritz.box", 443, &router).login("admin", "äbc").unwrap();
    assert_eq!(session.id(), "a1b2c3d4e5f60718");

    let calls = router.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].url, "https://fritz.box:443/login_sid.lua");
    assert_eq!(calls[0].param("version"), Some("2"));
    assert_eq!(calls[1].method, "POST");
    assert_eq!(calls[1].param("username"), Some("admin"));
    assert_eq!(
        calls[1].param("response"),
        Some("1234567z-9e224a41eeefa284df7bb0f26c2913e2")
    );
}

#[test]
fn test_login_rejected() {
    let router = ScriptedRouter::new()
        .reply_xml(&session_info(SID_NOAUTH, "1234567z", 0))
        .reply_xml(&session_info(SID_NOAUTH, "89abcdef", 1));

    assert!(matches!(
        Router::new("fritz.box", 443, &router).login("admin", "wrong"),
        Err(RouterError::Authentication)
    ));
}

#[test]
fn test_login_blocked() {
    let router = ScriptedRouter::new().reply_xml(&session_info(SID_NOAUTH, "1234567z", 32));

    assert!(matches!(
        Router::new("fritz.box", 443, &router).login("admin", "secret"),
        Err(RouterError::Blocked(32))
    ));
    assert_eq!(router.calls().len(), 1);
}

#[test]
fn test_login_unexpected_document() {
    let router = ScriptedRouter::new().reply_xml("<html><body>Login</body></html>");

    assert!(matches!(
        Router::new("fritz.box", 443, &router).login("admin", "secret"),
        Err(RouterError::Protocol { .. })
    ));
}

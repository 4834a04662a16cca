use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::login::SID_NOAUTH;
use super::{Response, Router, Session, Transport};
use crate::error::RouterError;
use crate::mac::MacAddress;

const DATA_ENDPOINT: &str = "data.lua";

/// Last firmware that names the device page `edit_device2`.
const LAST_LEGACY_EDIT_PAGE: FirmwareVersion = FirmwareVersion(7, 24);

#[derive(Deserialize, Debug)]
struct HostListing {
    data: Hosts,
}

#[derive(Deserialize, Debug)]
struct Hosts {
    #[serde(default)]
    active: Vec<Host>,
    #[serde(default)]
    passive: Vec<Host>,
}

/// Entries without a MAC or UID are skipped, not rejected.
#[derive(Deserialize, Debug)]
struct Host {
    #[serde(default)]
    mac: Option<String>,
    #[serde(default, rename = "UID")]
    uid: Option<String>,
}

/// `major.minor` of the FRITZ!OS release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion(pub u32, pub u32);

impl FirmwareVersion {
    /// Reads strings like `7.57` or `7.29 build 1234`; anything else is `0.0`.
    pub fn parse(text: &str) -> FirmwareVersion {
        let token = text.split_whitespace().next().unwrap_or_default();
        let mut parts = token.split('.').map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse::<u32>().ok()
        });

        match (parts.next().flatten(), parts.next().flatten()) {
            (Some(major), Some(minor)) => FirmwareVersion(major, minor),
            (Some(major), None) => FirmwareVersion(major, 0),
            _ => FirmwareVersion(0, 0),
        }
    }
}

impl<T: Transport> Router<T> {
    /// Has the router send a magic packet to the host with `mac`.
    ///
    /// The box addresses hosts by its own UID, so this looks the MAC up in
    /// the host listing first and picks the device page matching the
    /// firmware release.
    pub fn wake(&self, session: &Session, mac: MacAddress) -> Result<(), RouterError> {
        let uid = self.host_uid(session, mac)?;
        let firmware = self.firmware_version(session)?;

        let page = if firmware <= LAST_LEGACY_EDIT_PAGE {
            "edit_device2"
        } else {
            "edit_device"
        };
        debug!(%uid, ?firmware, page, "sending wake-up request");

        let response = self.data(&[
            ("sid", session.id()),
            ("dev", uid.as_str()),
            ("oldpage", "net/edit_device.lua"),
            ("page", page),
            ("btn_wake", ""),
        ])?;

        let confirmed = if response.is_json() {
            let reply = parse_json(&response)?;
            reply.pointer("/data/btn_wake").and_then(Value::as_str) == Some("ok")
        } else {
            response.body.contains(r#""pid":"netDev""#)
        };

        if !confirmed {
            return Err(RouterError::WakeRejected);
        }
        info!(%mac, %uid, "wake-up request accepted");
        Ok(())
    }

    fn host_uid(&self, session: &Session, mac: MacAddress) -> Result<String, RouterError> {
        let response = self.data(&[("sid", session.id()), ("page", "netDev"), ("xhrId", "all")])?;
        let listing: HostListing = serde_json::from_value(parse_json(&response)?)
            .map_err(|err| RouterError::protocol(DATA_ENDPOINT, format!("host listing: {err}")))?;

        listing
            .data
            .passive
            .into_iter()
            .chain(listing.data.active)
            .filter_map(|host| Some((host.mac?.parse::<MacAddress>().ok()?, host.uid?)))
            .find(|(listed, _)| *listed == mac)
            .map(|(_, uid)| uid)
            .ok_or_else(|| RouterError::DeviceNotInRouter(mac.to_string()))
    }

    fn firmware_version(&self, session: &Session) -> Result<FirmwareVersion, RouterError> {
        let response = self.data(&[("sid", session.id()), ("page", "overview")])?;
        let overview = parse_json(&response)?;

        match overview.pointer("/data/fritzos/nspver").and_then(Value::as_str) {
            Some(text) => Ok(FirmwareVersion::parse(text)),
            None => {
                warn!("overview page has no firmware version, assuming an old release");
                Ok(FirmwareVersion(0, 0))
            }
        }
    }

    /// POSTs to `data.lua`, turning rejected sessions and HTTP failures into errors.
    fn data(&self, form: &[(&str, &str)]) -> Result<Response, RouterError> {
        let response = self.transport.post_form(&self.url(DATA_ENDPOINT), form)?;
        match response.status {
            401 | 403 => return Err(RouterError::SessionExpired),
            _ if !response.is_success() => {
                return Err(RouterError::Request {
                    endpoint: DATA_ENDPOINT,
                    status: response.status,
                })
            }
            _ => {}
        }
        Ok(response)
    }
}

fn parse_json(response: &Response) -> Result<Value, RouterError> {
    let value: Value = serde_json::from_str(&response.body).map_err(|err| {
        if response.body.contains("login_sid.lua") || response.body.contains("<html") {
            // data.lua answers a stale session with the login page
            RouterError::SessionExpired
        } else {
            RouterError::protocol(DATA_ENDPOINT, format!("not JSON: {err}"))
        }
    })?;

    if value.get("sid").and_then(Value::as_str) == Some(SID_NOAUTH) {
        return Err(RouterError::SessionExpired);
    }
    Ok(value)
}

#[cfg(test)]
use super::fake::{host_listing, overview, ScriptedRouter};

#[cfg(test)]
fn session() -> Session {
    Session("a1b2c3d4e5f60718".to_string())
}

#[test]
fn test_firmware_version_parse() {
    assert_eq!(FirmwareVersion::parse("7.57"), FirmwareVersion(7, 57));
    assert_eq!(FirmwareVersion::parse("7.29 build 1234"), FirmwareVersion(7, 29));
    assert_eq!(FirmwareVersion::parse("8.00-112345"), FirmwareVersion(8, 0));
    assert_eq!(FirmwareVersion::parse("garbage"), FirmwareVersion(0, 0));
    assert!(FirmwareVersion(7, 24) < FirmwareVersion(7, 25));
    assert!(FirmwareVersion(6, 99) < FirmwareVersion(7, 0));
}

#[test]
fn test_wake_modern_firmware() {
    let router = ScriptedRouter::new()
        .reply_json(host_listing())
        .reply_json(&overview("7.57"))
        .reply_json(r#"{"pid":"edit_device","data":{"btn_wake":"ok"}}"#);

    let mac = "aa-bb-cc-dd-ee-ff".parse().unwrap();
    Router::new("fritz.box", 443, &router).wake(&session(), mac).unwrap();

    let calls = router.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.path() == "/data.lua" && c.param("sid") == Some(session().id())));
    assert_eq!(calls[0].param("page"), Some("netDev"));
    assert_eq!(calls[1].param("page"), Some("overview"));
    assert_eq!(calls[2].param("page"), Some("edit_device"));
    assert_eq!(calls[2].param("dev"), Some("landevice7002"));
    assert_eq!(calls[2].param("btn_wake"), Some(""));
}

#[test]
fn test_wake_legacy_firmware_html_reply() {
    let router = ScriptedRouter::new()
        .reply_json(host_listing())
        .reply_json(&overview("7.21"))
        .reply(200, "text/html", r#"<script>var data = {"pid":"netDev"};</script>"#);

    let mac = "00:11:22:33:44:55".parse().unwrap();
    Router::new("fritz.box", 443, &router).wake(&session(), mac).unwrap();

    let calls = router.calls();
    assert_eq!(calls[2].param("page"), Some("edit_device2"));
    assert_eq!(calls[2].param("dev"), Some("landevice7001"));
}

#[test]
fn test_wake_unconfirmed() {
    let router = ScriptedRouter::new()
        .reply_json(host_listing())
        .reply_json(&overview("7.57"))
        .reply_json(r#"{"pid":"edit_device","data":{"btn_wake":"error"}}"#);

    let mac = "aa:bb:cc:dd:ee:ff".parse().unwrap();
    assert!(matches!(
        Router::new("fritz.box", 443, &router).wake(&session(), mac),
        Err(RouterError::WakeRejected)
    ));
}

#[test]
fn test_incomplete_hosts_are_skipped() {
    let router = ScriptedRouter::new()
        .reply_json(
            r#"{"pid":"netDev","data":{
                "active":[{"mac":null,"UID":"landevice7010"},{"mac":"AA:BB:CC:DD:EE:FF"},{"UID":"landevice7011"}],
                "passive":[{"mac":"AA:BB:CC:DD:EE:FF","UID":"landevice7012"}]
            }}"#,
        )
        .reply_json(&overview("7.57"))
        .reply_json(r#"{"data":{"btn_wake":"ok"}}"#);

    let mac = "aa:bb:cc:dd:ee:ff".parse().unwrap();
    Router::new("fritz.box", 443, &router).wake(&session(), mac).unwrap();
    assert_eq!(router.calls()[2].param("dev"), Some("landevice7012"));
}

#[test]
fn test_wake_unknown_to_router() {
    let router = ScriptedRouter::new().reply_json(host_listing());

    let mac = "12:34:56:78:9a:bc".parse().unwrap();
    match Router::new("fritz.box", 443, &router).wake(&session(), mac) {
        Err(RouterError::DeviceNotInRouter(mac)) => assert_eq!(mac, "12:34:56:78:9A:BC"),
        other => panic!("expected missing device, got {other:?}"),
    }
    assert_eq!(router.calls().len(), 1);
}

#[test]
fn test_wake_with_stale_session() {
    let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();

    let forbidden = ScriptedRouter::new().reply(403, "text/html", "Forbidden");
    assert!(matches!(
        Router::new("fritz.box", 443, &forbidden).wake(&session(), mac),
        Err(RouterError::SessionExpired)
    ));

    let sentinel = ScriptedRouter::new().reply_json(r#"{"pid":"netDev","sid":"0000000000000000","data":{}}"#);
    assert!(matches!(
        Router::new("fritz.box", 443, &sentinel).wake(&session(), mac),
        Err(RouterError::SessionExpired)
    ));

    let login_page = ScriptedRouter::new().reply(200, "text/html", "<html><form action=\"/login_sid.lua\"></form></html>");
    assert!(matches!(
        Router::new("fritz.box", 443, &login_page).wake(&session(), mac),
        Err(RouterError::SessionExpired)
    ));
}

#[test]
fn test_wake_server_error() {
    let router = ScriptedRouter::new().reply(500, "text/plain", "oops");

    let mac = "aa:bb:cc:dd:ee:ff".parse().unwrap();
    assert!(matches!(
        Router::new("fritz.box", 443, &router).wake(&session(), mac),
        Err(RouterError::Request { status: 500, .. })
    ));
}

#[test]
fn test_overview_without_version_assumes_legacy_page() {
    let router = ScriptedRouter::new()
        .reply_json(host_listing())
        .reply_json(r#"{"pid":"overview","data":{}}"#)
        .reply_json(r#"{"data":{"btn_wake":"ok"}}"#);

    let mac = "aa:bb:cc:dd:ee:ff".parse().unwrap();
    Router::new("fritz.box", 443, &router).wake(&session(), mac).unwrap();
    assert_eq!(router.calls()[2].param("page"), Some("edit_device2"));
}

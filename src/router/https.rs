use std::error::Error as _;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use super::{Response, Transport};
use crate::error::RouterError;

/// Upper bound for every request, connect included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocking HTTPS transport with a fixed timeout.
pub struct HttpsTransport {
    client: Client,
    verify_tls: bool,
}

impl HttpsTransport {
    pub fn new(verify_tls: bool) -> Result<HttpsTransport, RouterError> {
        if !verify_tls {
            warn!("TLS certificate verification is disabled for this run");
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|err| RouterError::Connection(format!("unable to create HTTP client: {err}")))?;

        Ok(HttpsTransport { client, verify_tls })
    }

    fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, RouterError> {
        let response = request.send().map_err(|err| self.connection_error(err))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().map_err(|err| self.connection_error(err))?;
        debug!(url, status, bytes = body.len(), "router replied");

        Ok(Response {
            status,
            content_type,
            body,
        })
    }

    fn connection_error(&self, err: reqwest::Error) -> RouterError {
        // reqwest's own message rarely names the TLS failure, its sources do
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        if self.verify_tls && message.to_lowercase().contains("certificate") {
            message.push_str(
                " (the router may use a self-signed certificate; \
                 --ssl-no-verify skips the check, not recommended)",
            );
        }
        RouterError::Connection(message)
    }
}

impl Transport for HttpsTransport {
    fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Response, RouterError> {
        debug!(url, "GET");
        self.send(self.client.get(url).query(query), url)
    }

    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Response, RouterError> {
        debug!(url, "POST");
        self.send(self.client.post(url).form(form), url)
    }
}

/// Serves `connections` HTTPS requests with a freshly generated self-signed
/// certificate, answering each with a `SessionInfo` document.
#[cfg(test)]
fn self_signed_server(connections: usize) -> std::net::SocketAddr {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;

    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};

    let certified = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![certified.cert.der().clone()], key)
    .unwrap();
    let config = Arc::new(config);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming().take(connections) {
            let Ok(tcp) = stream else { continue };
            let conn = rustls::ServerConnection::new(config.clone()).unwrap();
            let mut tls = rustls::StreamOwned::new(conn, tcp);

            // a rejected certificate ends the handshake inside this read
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match tls.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            if request.is_empty() {
                continue;
            }

            let body = "<SessionInfo><SID>0000000000000000</SID><Challenge>1234567z</Challenge><BlockTime>0</BlockTime></SessionInfo>";
            let _ = write!(
                tls,
                "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            tls.conn.send_close_notify();
            let _ = tls.flush();
        }
    });
    addr
}

#[test]
fn test_self_signed_certificate_is_rejected_when_verifying() {
    let addr = self_signed_server(1);
    let transport = HttpsTransport::new(true).unwrap();

    match transport.get(&format!("https://{addr}/login_sid.lua"), &[("version", "2")]) {
        Err(RouterError::Connection(message)) => assert!(message.contains("--ssl-no-verify")),
        other => panic!("expected a connection error, got {other:?}"),
    }
}

#[test]
fn test_self_signed_certificate_is_accepted_without_verification() {
    let addr = self_signed_server(1);
    let transport = HttpsTransport::new(false).unwrap();

    let response = transport
        .get(&format!("https://{addr}/login_sid.lua"), &[("version", "2")])
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type.as_deref(), Some("text/xml"));
    assert!(response.body.contains("<Challenge>1234567z</Challenge>"));
}

#[test]
fn test_unreachable_router_is_a_connection_error() {
    // bind then drop so nothing listens on the port
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let transport = HttpsTransport::new(false).unwrap();
    assert!(matches!(
        transport.post_form(&format!("https://{addr}/data.lua"), &[("sid", "0")]),
        Err(RouterError::Connection(_))
    ));
}

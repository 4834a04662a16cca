//! Client for the FRITZ!Box web administration endpoints.
//!
//! [`Router::login`] performs the `login_sid.lua` challenge-response and
//! [`Router::wake`] drives the `data.lua` pages that make the box send a
//! magic packet on our behalf. HTTP goes through a [`Transport`] so both
//! can be exercised against a scripted router.
use std::fmt;

use crate::error::RouterError;

#[cfg(test)]
pub mod fake;
pub mod https;
mod login;
mod wake;

pub use https::HttpsTransport;

/// The bits of an HTTP response the router flows look at.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/json"))
    }
}

pub trait Transport {
    fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Response, RouterError>;

    /// POST as `application/x-www-form-urlencoded`.
    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Response, RouterError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Response, RouterError> {
        (**self).get(url, query)
    }

    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Response, RouterError> {
        (**self).post_form(url, form)
    }
}

/// Session id handed out by `login_sid.lua`. Only ever shown masked.
#[derive(Clone, PartialEq, Eq)]
pub struct Session(String);

impl Session {
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "{prefix}************")
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({self})")
    }
}

pub struct Router<T> {
    base_url: String,
    transport: T,
}

impl<T: Transport> Router<T> {
    pub fn new(host: &str, port: u16, transport: T) -> Self {
        Router {
            base_url: format!("https://{host}:{port}"),
            transport,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }
}

#[test]
fn test_session_is_masked() {
    let session = Session("a1b2c3d4e5f60718".to_string());
    assert_eq!(session.to_string(), "a1b2************");
    assert!(!format!("{session:?}").contains("e5f60718"));
    assert_eq!(session.id(), "a1b2c3d4e5f60718");
}

#[test]
fn test_response_content_type() {
    let response = Response {
        status: 200,
        content_type: Some("application/json;charset=utf-8".to_string()),
        body: "{}".to_string(),
    };
    assert!(response.is_success());
    assert!(response.is_json());
}

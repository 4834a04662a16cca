//! A scripted router: replays canned responses in order and records
//! every request it was sent.
use std::cell::RefCell;
use std::collections::VecDeque;

use super::{Response, Transport};
use crate::error::RouterError;

#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl Call {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn path(&self) -> &str {
        let path = self.url.split_once("://").map_or(self.url.as_str(), |(_, rest)| rest);
        let path = path.find('/').map_or("", |i| &path[i..]);
        path.split('?').next().unwrap_or(path)
    }
}

#[derive(Default)]
pub struct ScriptedRouter {
    replies: RefCell<VecDeque<Result<Response, RouterError>>>,
    calls: RefCell<Vec<Call>>,
}

impl ScriptedRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, status: u16, content_type: &str, body: &str) -> Self {
        self.replies.borrow_mut().push_back(Ok(Response {
            status,
            content_type: Some(content_type.to_string()),
            body: body.to_string(),
        }));
        self
    }

    pub fn reply_xml(self, body: &str) -> Self {
        self.reply(200, "text/xml", body)
    }

    pub fn reply_json(self, body: &str) -> Self {
        self.reply(200, "application/json;charset=utf-8", body)
    }

    pub fn fail(self, error: RouterError) -> Self {
        self.replies.borrow_mut().push_back(Err(error));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    fn answer(&self, method: &'static str, url: &str, params: &[(&str, &str)]) -> Result<Response, RouterError> {
        self.calls.borrow_mut().push(Call {
            method,
            url: url.to_string(),
            params: params
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        });

        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(RouterError::Connection(format!("no scripted reply for {method} {url}"))))
    }
}

impl Transport for ScriptedRouter {
    fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Response, RouterError> {
        self.answer("GET", url, query)
    }

    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Response, RouterError> {
        self.answer("POST", url, form)
    }
}

pub fn session_info(sid: &str, challenge: &str, block_time: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><SessionInfo><SID>{sid}</SID><Challenge>{challenge}</Challenge><BlockTime>{block_time}</BlockTime><Rights></Rights><Users><User last="1">admin</User></Users></SessionInfo>"#
    )
}

/// `netDev` listing with one active and one passive host.
pub fn host_listing() -> &'static str {
    r#"{"pid":"netDev","sid":"a1b2c3d4e5f60718","data":{
        "active":[{"mac":"00:11:22:33:44:55","UID":"landevice7001","name":"nas"}],
        "passive":[{"mac":"AA:BB:CC:DD:EE:FF","UID":"landevice7002","name":"desktop"},{"mac":"","UID":"landevice7003","name":"guest"}]
    }}"#
}

pub fn overview(version: &str) -> String {
    format!(
        r#"{{"pid":"overview","sid":"a1b2c3d4e5f60718","data":{{"fritzos":{{"nspver":"{version}","Productname":"FRITZ!Box 7590"}}}}}}"#
    )
}

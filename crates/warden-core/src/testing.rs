//! Scripted collaborators shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::auth::AccessToken;
use crate::clock::Clock;
use crate::http::{Response, Transport, TransportError};

/// A request seen by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub method: &'static str,
    pub url: String,
    pub accept: Option<String>,
    pub form: Vec<(String, String)>,
}

/// Transport answering from per-URL queues.
///
/// The last queued response for a URL is repeated once the queue drains.
/// Unknown URLs answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Result<Response, String>>>>,
    requests: Mutex<Vec<Recorded>>,
    authorized: Mutex<Option<AccessToken>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: Response) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(Ok(response));
        self
    }

    pub fn respond_json(&self, url: &str, json: serde_json::Value) -> &Self {
        self.respond(url, Response::new(200, json.to_string()))
    }

    pub fn fail(&self, url: &str, message: &str) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| r.url == url).count()
    }

    pub fn authorized(&self) -> Option<AccessToken> {
        self.authorized.lock().unwrap().clone()
    }

    fn answer(&self, recorded: Recorded) -> Result<Response, TransportError> {
        let url = recorded.url.clone();
        self.requests.lock().unwrap().push(recorded);

        let mut routes = self.routes.lock().unwrap();
        let next = match routes.get_mut(&url) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(TransportError::Request { url, message }),
            None => Ok(Response::new(404, "Not Found")),
        }
    }
}

impl Transport for ScriptedTransport {
    fn get(&self, url: &str, accept: &str) -> Result<Response, TransportError> {
        self.answer(Recorded {
            method: "GET",
            url: url.to_string(),
            accept: Some(accept.to_string()),
            form: Vec::new(),
        })
    }

    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Response, TransportError> {
        self.answer(Recorded {
            method: "POST",
            url: url.to_string(),
            accept: None,
            form: form
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
    }

    fn authorize(&self, token: &AccessToken) {
        *self.authorized.lock().unwrap() = Some(token.clone());
    }
}

/// Clock whose time only moves when something sleeps.
pub struct ManualClock {
    now: Mutex<Instant>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
        self.sleeps.lock().unwrap().push(duration);
    }
}

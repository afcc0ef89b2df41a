//! Common test utilities for lgbot-client integration tests

#![allow(dead_code)] // Each test file uses a different subset

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use lgbot_client::endpoints;
use lgbot_client::{
    BotError, BotResult, Credentials, EngineConfig, HttpResponse, MoveGenerator, ReplayMode,
    Transport,
};

pub const SESSION_COOKIE: &str = "JSESSIONID=test-session";

/// Scripted server reply
#[derive(Debug, Clone)]
pub enum Reply {
    Http(HttpResponse),
    Timeout,
    Unreachable,
}

pub fn ok(body: &str) -> Reply {
    status(200, body)
}

pub fn status(code: u16, body: &str) -> Reply {
    Reply::Http(HttpResponse {
        status: code,
        body: body.to_string(),
        set_cookie: None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: Option<String>,
    pub cookie: Option<String>,
}

/// In-memory server. Each (method, path) has a queue of replies; the last one repeats.
/// Unknown routes answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: RefCell<HashMap<(String, String), VecDeque<Reply>>>,
    requests: RefCell<Vec<Request>>,
    stop: Option<StopAfter>,
}

/// Raises a shutdown flag once a route has been hit `hits` times.
struct StopAfter {
    method: String,
    path: String,
    hits: usize,
    flag: Arc<AtomicBool>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Login page hands out [`SESSION_COOKIE`], the form POST redirects.
    pub fn with_login(self) -> Self {
        let page = Reply::Http(HttpResponse {
            status: 200,
            body: "<form action=\"login\"></form>".into(),
            set_cookie: Some(SESSION_COOKIE.into()),
        });
        self.on("GET", endpoints::LOGIN, page).on("POST", endpoints::LOGIN, status(302, ""))
    }

    pub fn on(self, method: &str, path: &str, reply: Reply) -> Self {
        self.routes
            .borrow_mut()
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn stop_after(mut self, method: &str, path: &str, hits: usize, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(StopAfter {
            method: method.to_string(),
            path: path.to_string(),
            hits,
            flag,
        });
        self
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests.borrow().iter().filter(|r| r.method == method && r.path == path).count()
    }

    pub fn find(&self, method: &str, path: &str) -> Option<Request> {
        self.requests.borrow().iter().find(|r| r.method == method && r.path == path).cloned()
    }

    fn answer(&self, method: &'static str, path: &str, body: Option<&str>, cookie: Option<&str>) -> BotResult<HttpResponse> {
        self.requests.borrow_mut().push(Request {
            method: method.to_string(),
            path: path.to_string(),
            body: body.map(String::from),
            cookie: cookie.map(String::from),
        });
        if let Some(stop) = &self.stop {
            if self.count(&stop.method, &stop.path) >= stop.hits {
                stop.flag.store(true, Ordering::SeqCst);
            }
        }
        let reply = {
            let mut routes = self.routes.borrow_mut();
            match routes.get_mut(&(method.to_string(), path.to_string())) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        match reply.unwrap_or_else(|| status(404, "not found")) {
            Reply::Http(response) => Ok(response),
            Reply::Timeout => Err(BotError::NetworkTimeout {
                method,
                path: path.to_string(),
            }),
            Reply::Unreachable => Err(BotError::Network {
                method,
                path: path.to_string(),
                message: "connection refused".into(),
            }),
        }
    }
}

impl Transport for ScriptedTransport {
    fn get(&self, path: &str, cookie: Option<&str>) -> BotResult<HttpResponse> {
        self.answer("GET", path, None, cookie)
    }

    fn post_form(&self, path: &str, form: &str, cookie: Option<&str>) -> BotResult<HttpResponse> {
        self.answer("POST", path, Some(form), cookie)
    }
}

pub fn credentials() -> Credentials {
    Credentials {
        login: "HexBot".into(),
        password: "secret".into(),
    }
}

/// Move generator that replays canned answers and records what it was asked.
#[derive(Default)]
pub struct ScriptedGenerator {
    answers: VecDeque<BotResult<String>>,
    pub calls: Vec<(u32, Vec<String>)>,
}

impl ScriptedGenerator {
    pub fn new(answers: impl IntoIterator<Item = BotResult<String>>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            calls: Vec::new(),
        }
    }
}

impl MoveGenerator for ScriptedGenerator {
    fn genmove(&mut self, size: u32, moves: &[String]) -> BotResult<String> {
        self.calls.push((size, moves.to_vec()));
        self.answers
            .pop_front()
            .unwrap_or_else(|| Err(BotError::EngineProtocol("no scripted answer left".into())))
    }
}

pub fn sheet(game_ids: &[u64], invitations: bool) -> String {
    let rows: String = game_ids
        .iter()
        .map(|id| format!("<tr><td><a href=\"/jsp/game/game.jsp?gid={id}\">#{id}</a></td></tr>\n"))
        .collect();
    let invitation_line = if invitations { "<p>New invitations: 1</p>" } else { "" };
    format!(
        "<html><body>{invitation_line}\n\
         <div>Games where it is your turn [{}]</div>\n<table>\n{rows}</table>\n\
         <div>Games where it is your opponent's turn [0]</div>\n</body></html>",
        game_ids.len()
    )
}

pub fn invitation_page(id: u64, game_type: &str) -> String {
    format!(
        "<html><body><div>Your decision</div>\n<table>\n\
         <tr><th>Date</th><th>Opponent</th><th>Game</th></tr>\n\
         <tr><td>2010-03-04</td><td><a href=\"/jsp/info/player.jsp?plid=7\">carol</a></td>\
         <td>{game_type}</td><td>1</td><td>no</td>\
         <td><a href=\"/Invitation.action?accept=&invid={id}\">accept</a></td></tr>\n\
         </table></body></html>"
    )
}

pub fn record(size: u32, moves: &[(&str, &str)]) -> String {
    let body: String = moves.iter().map(|(color, mv)| format!(";{color}[{mv}]")).collect();
    format!("(;FF[4]EV[hex.mc]PB[alice]PW[HexBot]SZ[{size}]{body})")
}

/// Fake GTP engine: a POSIX sh script run through `sh`, so nothing needs the exec bit.
///
/// `genmove` runs `genmove_branch`; every other command is acknowledged. Each received
/// line is appended to `log` when given.
pub fn gtp_script(dir: &Path, genmove_branch: &str, log: Option<&Path>) -> PathBuf {
    let record = log.map(|p| format!("echo \"$line\" >> '{}'", p.display())).unwrap_or_default();
    let script = format!(
        r#"while IFS= read -r line; do
  {record}
  case "$line" in
    genmove*) {genmove_branch} ;;
    quit*) printf '=\n\n'; exit 0 ;;
    showboard*) printf '= \n  a b c\n1 . . .\n\n' ;;
    *) printf '=\n\n' ;;
  esac
done
"#
    );
    let path = dir.join("fake-engine.sh");
    fs::write(&path, script).expect("failed to write fake engine");
    path
}

pub fn engine_config(script: &Path) -> EngineConfig {
    EngineConfig {
        path: PathBuf::from("sh"),
        args: vec![script.display().to_string()],
        replay: ReplayMode::PerMove,
        show_board: false,
        think_time: Duration::from_secs(5),
        timeout_margin: Duration::from_secs(1),
        command_timeout: Duration::from_secs(5),
        options: Vec::new(),
    }
}

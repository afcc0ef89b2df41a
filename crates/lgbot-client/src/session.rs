//! 認証付き HTTP セッション
//!
//! 失敗した要求は「1回だけ再ログインして1回だけ再送」する。それ以上は再試行しない。
//! POST (着手送信) はサーバー側で冪等ではないため、呼び出し側でも再送してはならない。

use crate::endpoints;
use crate::error::{BotError, BotResult};
use crate::transport::{HttpResponse, Transport};

#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct SessionClient<T> {
    transport: T,
    credentials: Credentials,
    /// Cookie ヘッダにそのまま載せるセッショントークン
    token: Option<String>,
}

impl<T: Transport> SessionClient<T> {
    pub fn new(transport: T, credentials: Credentials) -> Self {
        Self {
            transport,
            credentials,
            token: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// ログイン画面でトークンを受け取り、資格情報を POST する。
    ///
    /// ログイン成功時はリダイレクトが返ることがあるので 3xx も成功扱い。
    pub fn login(&mut self) -> BotResult<()> {
        self.token = None;
        let page = self.transport.get(endpoints::LOGIN, None)?;
        if !page.is_success() {
            return Err(BotError::Auth {
                status: page.status,
            });
        }
        let mut token = page.set_cookie;

        let form = endpoints::login_form(&self.credentials.login, &self.credentials.password);
        let response = self.transport.post_form(endpoints::LOGIN, &form, token.as_deref())?;
        if !(response.is_success() || response.is_redirect()) {
            return Err(BotError::Auth {
                status: response.status,
            });
        }
        if response.set_cookie.is_some() {
            token = response.set_cookie;
        }
        self.token = token;
        log::debug!("logged in as {}", self.credentials.login);
        Ok(())
    }

    /// 認証付き GET。本文を返す。
    pub fn fetch(&mut self, path: &str) -> BotResult<String> {
        self.with_relogin("GET", path, |transport, cookie| transport.get(path, cookie))
    }

    /// 認証付き POST (url-encoded 本文)。本文を返す。
    pub fn post(&mut self, path: &str, form: &str) -> BotResult<String> {
        self.with_relogin("POST", path, |transport, cookie| {
            transport.post_form(path, form, cookie)
        })
    }

    /// サーバー側とローカルの両方でセッションを破棄する。
    pub fn logout(&mut self) -> BotResult<()> {
        let Some(token) = self.token.take() else {
            return Ok(());
        };
        let response = self.transport.get(endpoints::LOGOUT, Some(&token))?;
        if !response.is_success() && !response.is_redirect() {
            log::warn!("logout returned HTTP {}", response.status);
        }
        Ok(())
    }

    fn with_relogin<F>(&mut self, method: &'static str, path: &str, send: F) -> BotResult<String>
    where
        F: Fn(&T, Option<&str>) -> BotResult<HttpResponse>,
    {
        let first = send(&self.transport, self.token.as_deref())?;
        if first.is_success() {
            return Ok(self.accept(first));
        }

        log::info!("{method} {path} returned HTTP {}, logging in again", first.status);
        self.login()?;
        let retry = send(&self.transport, self.token.as_deref())?;
        if retry.is_success() {
            return Ok(self.accept(retry));
        }
        self.token = None;
        Err(BotError::Fetch {
            method,
            path: path.to_string(),
            status: retry.status,
        })
    }

    fn accept(&mut self, response: HttpResponse) -> String {
        if response.set_cookie.is_some() {
            self.token = response.set_cookie;
        }
        response.body
    }
}

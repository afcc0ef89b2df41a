//! HTTP 転送層
//!
//! [`SessionClient`](crate::session::SessionClient) は [`Transport`] 越しにしか通信しない。
//! 本番は reqwest の blocking client、テストはメモリ上のスクリプトを差し込む。

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderValue, SET_COOKIE};
use reqwest::redirect::Policy;
use url::Url;

use crate::error::{BotError, BotResult};

/// 1回の HTTP 応答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// `Set-Cookie` の name=value 部分 (複数ある場合は `; ` 連結)
    pub set_cookie: Option<String>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// サーバーへの生の要求。セッション管理は上位の責務。
pub trait Transport {
    fn get(&self, path: &str, cookie: Option<&str>) -> BotResult<HttpResponse>;

    /// `form` は url-encoded 済みの本文
    fn post_form(&self, path: &str, form: &str, cookie: Option<&str>) -> BotResult<HttpResponse>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, path: &str, cookie: Option<&str>) -> BotResult<HttpResponse> {
        (**self).get(path, cookie)
    }

    fn post_form(&self, path: &str, form: &str, cookie: Option<&str>) -> BotResult<HttpResponse> {
        (**self).post_form(path, form, cookie)
    }
}

/// 接続・読み取りのタイムアウト。未設定だと応答しないサーバーで永久に止まる。
#[derive(Debug, Clone, Copy)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

/// reqwest による [`Transport`] 実装
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeouts: HttpTimeouts, user_agent: &str) -> Result<Self> {
        let parsed = Url::parse(base_url).with_context(|| format!("invalid base url {base_url}"))?;
        anyhow::ensure!(
            matches!(parsed.scheme(), "http" | "https"),
            "base url must be http(s): {base_url}"
        );
        // リダイレクトは追わない。期限切れセッションはログイン画面への 302 として現れるので、
        // それを非成功として再ログインの契機にする。
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.read)
            .redirect(Policy::none())
            .user_agent(user_agent)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(
        &self,
        method: &'static str,
        path: &str,
        request: RequestBuilder,
        cookie: Option<&str>,
    ) -> BotResult<HttpResponse> {
        // ヘッダにできないトークンを黙って落とすと未認証の要求になるので、送らずに失敗させる
        let request = match cookie.map(HeaderValue::from_str).transpose() {
            Ok(Some(value)) => request.header(COOKIE, value),
            Ok(None) => request,
            Err(e) => {
                return Err(BotError::Network {
                    method,
                    path: path.to_string(),
                    message: format!("session cookie is not a valid header value: {e}"),
                });
            }
        };
        let network_error = |e: reqwest::Error| {
            if e.is_timeout() {
                BotError::NetworkTimeout {
                    method,
                    path: path.to_string(),
                }
            } else {
                BotError::Network {
                    method,
                    path: path.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = request.send().map_err(network_error)?;
        let status = response.status().as_u16();
        let cookies: Vec<&str> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        let set_cookie = (!cookies.is_empty()).then(|| cookies.join("; "));
        let body = response.text().map_err(network_error)?;
        log::trace!("{method} {path} -> {status} ({} bytes)", body.len());

        Ok(HttpResponse {
            status,
            body,
            set_cookie,
        })
    }
}

impl Transport for HttpTransport {
    fn get(&self, path: &str, cookie: Option<&str>) -> BotResult<HttpResponse> {
        self.send("GET", path, self.client.get(self.url(path)), cookie)
    }

    fn post_form(&self, path: &str, form: &str, cookie: Option<&str>) -> BotResult<HttpResponse> {
        let request = self
            .client
            .post(self.url(path))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form.to_string());
        self.send("POST", path, request, cookie)
    }
}

//! Bilibili API クライアント実装
//!
//! すべての呼び出しは
//! `RetryExecutor → TimeoutGuard → RequestGate → HTTP → エンベロープ解釈`
//! の順に処理される。

use reqwest::header::{ACCEPT, REFERER};
use reqwest::Client;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use super::errors::{classify_envelope_error, BiliError};
use super::gate::RequestGate;
use super::retry::{RetryExecutor, RetryStats};
use super::timeout::TimeoutGuard;
use super::wbi::{self, WbiKeyProvider, WbiKeys};
use crate::config::Config;
use crate::credentials::CredentialProvider;
use crate::util::ensure_scheme;

/// 署名鍵を含むnavエンドポイント
const NAV_PATH: &str = "/x/web-interface/nav";

/// Bilibili APIクライアント
///
/// ゲート・鍵キャッシュ・リトライ統計はこのインスタンスが所有する。
/// プロセスで1つ作成して `Arc` で共有すること。
pub struct BiliClient {
    http: Client,
    config: Config,
    gate: RequestGate,
    guard: TimeoutGuard,
    retry: RetryExecutor,
    keys: WbiKeyProvider,
    credentials: Arc<dyn CredentialProvider>,
}

impl BiliClient {
    /// 新しいクライアントを作成
    ///
    /// # Errors
    /// HTTPクライアントのビルドに失敗した場合にエラーを返す
    pub fn new(config: Config, credentials: Arc<dyn CredentialProvider>) -> Result<Self, BiliError> {
        let http = Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| BiliError::Transport {
                status: None,
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            gate: RequestGate::new(config.min_interval()),
            guard: TimeoutGuard::new(config.request_timeout()),
            retry: RetryExecutor::new(),
            keys: WbiKeyProvider::new(config.key_cache_ttl()),
            credentials,
            config,
        })
    }

    /// WBI署名付きGETリクエスト
    pub async fn fetch_signed(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, BiliError> {
        let keys = self.wbi_keys().await?;
        let url = self.api_url(path);
        let base: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        log::debug!("Fetching signed {}", path);
        self.execute(path, || async {
            // タイムスタンプは試行ごとに取り直す
            let query = wbi::sign(&base, &keys.mix_key, chrono::Utc::now().timestamp());
            let body = self.send(&url, &query, true).await?;
            interpret_envelope(body)
        })
        .await
    }

    /// 署名なしのGETリクエスト
    pub async fn fetch_unsigned(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, BiliError> {
        let url = self.api_url(path);
        let query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        log::debug!("Fetching {}", path);
        self.execute(path, || async {
            let body = self.send(&url, &query, true).await?;
            interpret_envelope(body)
        })
        .await
    }

    /// 字幕などエンベロープを持たないJSONを取得
    ///
    /// URLはスキームなし（`//host/...`）で渡されることがあるため `https:` を補う。
    /// CDN向けのため認証ヘッダーは付与しない。
    pub async fn fetch_raw(&self, url: &str) -> Result<Value, BiliError> {
        let url = ensure_scheme(url);
        log::debug!("Fetching raw content: {}", url);
        self.execute(&url, || async { self.send(&url, &[], false).await })
            .await
    }

    /// 有効な署名鍵を取得（期限切れならnavを取り直す）
    pub async fn wbi_keys(&self) -> Result<WbiKeys, BiliError> {
        self.keys.get_key(|| self.fetch_nav()).await
    }

    /// 署名鍵キャッシュ
    pub fn key_provider(&self) -> &WbiKeyProvider {
        &self.keys
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.retry.stats()
    }

    pub fn is_logged_in(&self) -> bool {
        self.credentials.is_logged_in()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// navを取得（未ログイン時も `wbi_img` が返るためコードは判定しない）
    async fn fetch_nav(&self) -> Result<Value, BiliError> {
        let url = self.api_url(NAV_PATH);
        self.execute(NAV_PATH, || async { self.send(&url, &[], true).await })
            .await
    }

    /// リトライ → タイムアウト → ゲートの順で1つの呼び出しを包む
    async fn execute<T, F, Fut>(&self, label: &str, attempt: F) -> Result<T, BiliError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BiliError>>,
    {
        let client = self;
        let attempt = &attempt;
        self.retry
            .run(&self.config.retry, move || async move {
                client
                    .guard
                    .run(async {
                        client.gate.acquire().await;
                        log::debug!("{}: admitted, in flight", label);
                        attempt().await
                    })
                    .await
                    .map_err(|err| {
                        log::debug!("{}: attempt failed ({:?})", label, err.kind());
                        err
                    })
            })
            .await
            .map(|value| {
                log::debug!("{}: succeeded", label);
                value
            })
    }

    /// HTTPリクエストを送信してJSONボディを返す
    ///
    /// 2xx以外はボディを解釈せずにトランスポートエラーとする。
    async fn send(
        &self,
        url: &str,
        query: &[(String, String)],
        with_auth: bool,
    ) -> Result<Value, BiliError> {
        let mut request = self
            .http
            .get(url)
            .query(query)
            .header(REFERER, self.config.referer.as_str())
            .header(ACCEPT, "application/json");

        if with_auth {
            for (name, value) in self.credentials.auth_headers() {
                request = request.header(name, value);
            }
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("Bilibili API error: HTTP {} for {}", status, url);
            return Err(BiliError::Transport {
                status: Some(status.as_u16()),
                message: format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ),
            });
        }

        Ok(response.json::<Value>().await?)
    }

    fn api_url(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

impl std::fmt::Debug for BiliClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiliClient")
            .field("base_url", &self.config.base_url)
            .field("min_interval", &self.gate.min_interval())
            .field("timeout", &self.guard.deadline())
            .field("logged_in", &self.credentials.is_logged_in())
            .finish()
    }
}

/// `{code, message, data}` を解釈する
pub fn interpret_envelope(body: Value) -> Result<Value, BiliError> {
    let Value::Object(mut envelope) = body else {
        return Err(BiliError::Structural("response is not a JSON object".to_string()));
    };

    let code = envelope
        .get("code")
        .and_then(Value::as_i64)
        .ok_or_else(|| BiliError::Structural("response has no envelope code".to_string()))?;

    if code == 0 {
        return Ok(envelope.remove("data").unwrap_or(Value::Null));
    }

    let message = envelope
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Unknown error");
    log::warn!("Bilibili API returned code {}: {}", code, message);
    Err(classify_envelope_error(code, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bilibili::errors::{ErrorKind, COMMENTS_DISABLED_MESSAGE};
    use crate::bilibili::retry::RetryPolicy;
    use crate::credentials::{Anonymous, CookieCredentials, StaticCredentials};
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;

    fn test_config(base_url: String) -> Config {
        Config {
            base_url,
            min_interval_ms: 0,
            request_timeout_ms: 5_000,
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                ..RetryPolicy::default()
            },
            ..Config::default()
        }
    }

    fn anonymous_client(server: &mockito::ServerGuard) -> BiliClient {
        BiliClient::new(test_config(server.url()), Arc::new(Anonymous)).unwrap()
    }

    fn nav_body() -> String {
        json!({
            "code": -101,
            "message": "账号未登录",
            "data": {
                "isLogin": false,
                "wbi_img": {
                    "img_url": "https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png",
                    "sub_url": "https://i0.hdslb.com/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png"
                }
            }
        })
        .to_string()
    }

    async fn mock_nav(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("GET", NAV_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(nav_body())
            .expect(1)
            .create_async()
            .await
    }

    fn signed_query(pairs: &[(&str, &str)]) -> Matcher {
        let mut matchers: Vec<Matcher> = pairs
            .iter()
            .map(|(k, v)| Matcher::UrlEncoded(k.to_string(), v.to_string()))
            .collect();
        matchers.push(Matcher::Regex(r"w_rid=[0-9a-f]{32}".to_string()));
        matchers.push(Matcher::Regex(r"wts=\d+".to_string()));
        Matcher::AllOf(matchers)
    }

    #[test]
    fn test_interpret_envelope() {
        let data = interpret_envelope(json!({ "code": 0, "message": "0", "data": { "x": 1 } })).unwrap();
        assert_eq!(data, json!({ "x": 1 }));

        // dataなしの成功はNull
        assert_eq!(interpret_envelope(json!({ "code": 0 })).unwrap(), Value::Null);

        assert!(matches!(
            interpret_envelope(json!({ "message": "no code" })),
            Err(BiliError::Structural(_))
        ));
        assert!(matches!(
            interpret_envelope(json!([1, 2, 3])),
            Err(BiliError::Structural(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_signed_success() {
        let mut server = mockito::Server::new_async().await;
        let nav = mock_nav(&mut server).await;
        let endpoint = server
            .mock("GET", "/p")
            .match_query(signed_query(&[("a", "1"), ("b", "2")]))
            .match_header("referer", "https://www.bilibili.com")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":0,"message":"0","data":{"x":1}}"#)
            .expect(2)
            .create_async()
            .await;

        let client = anonymous_client(&server);
        let data = client.fetch_signed("/p", &[("a", "1"), ("b", "2")]).await.unwrap();
        assert_eq!(data, json!({ "x": 1 }));

        // 2回目は鍵キャッシュを使う（navは1回のみ）
        client.fetch_signed("/p", &[("b", "2"), ("a", "1")]).await.unwrap();

        nav.assert_async().await;
        endpoint.assert_async().await;
    }

    /// 受信したクエリから `w_rid` を再計算して照合する
    fn signature_matches(path_and_query: &str, mix_key: &str) -> bool {
        let Some((_, query)) = path_and_query.split_once('?') else {
            return false;
        };
        let mut params = Vec::new();
        let mut wts = None;
        let mut w_rid = None;
        for pair in query.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                return false;
            };
            match key {
                wbi::TIMESTAMP_PARAM => wts = value.parse::<i64>().ok(),
                wbi::SIGNATURE_PARAM => w_rid = Some(value.to_string()),
                _ => params.push((key.to_string(), value.to_string())),
            }
        }
        let (Some(wts), Some(w_rid)) = (wts, w_rid) else {
            return false;
        };
        wbi::sign(&params, mix_key, wts)
            .iter()
            .any(|(key, value)| key == wbi::SIGNATURE_PARAM && *value == w_rid)
    }

    #[tokio::test]
    async fn test_fetch_signed_query_matches_signature() {
        let mut server = mockito::Server::new_async().await;
        let _nav = mock_nav(&mut server).await;
        let mix_key = wbi::mix_key(
            "7cd084941338484aae1ad9425b84077c",
            "4932caff0ff746eab6f01bf08b70ac45",
        );
        let endpoint = server
            .mock("GET", "/p")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body_from_request(move |request| {
                let verified = signature_matches(request.path_and_query(), &mix_key);
                json!({ "code": 0, "data": { "verified": verified } })
                    .to_string()
                    .into_bytes()
            })
            .expect(1)
            .create_async()
            .await;

        let client = anonymous_client(&server);
        let data = client
            .fetch_signed("/p", &[("zab", "1919810"), ("foo", "114"), ("bar", "514")])
            .await
            .unwrap();

        assert_eq!(data["verified"], true);
        endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_signed_comments_disabled() {
        let mut server = mockito::Server::new_async().await;
        let _nav = mock_nav(&mut server).await;
        let endpoint = server
            .mock("GET", "/p")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({ "code": -404, "message": COMMENTS_DISABLED_MESSAGE }).to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let client = anonymous_client(&server);
        let err = client.fetch_signed("/p", &[("a", "1"), ("b", "2")]).await.unwrap_err();

        assert!(matches!(err, BiliError::CommentsDisabled { code: -404, .. }));
        // ドメインエラーはリトライしない
        endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_signed_content_restricted() {
        let mut server = mockito::Server::new_async().await;
        let _nav = mock_nav(&mut server).await;
        let _endpoint = server
            .mock("GET", "/p")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":-403,"message":"访问权限不足"}"#)
            .create_async()
            .await;

        let client = anonymous_client(&server);
        let err = client.fetch_signed("/p", &[("a", "1"), ("b", "2")]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContentRestricted);
    }

    #[tokio::test]
    async fn test_nav_without_wbi_img_is_structural() {
        let mut server = mockito::Server::new_async().await;
        let nav = server
            .mock("GET", NAV_PATH)
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"isLogin":false}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = anonymous_client(&server);
        let err = client.fetch_signed("/p", &[("a", "1")]).await.unwrap_err();

        assert!(matches!(err, BiliError::Structural(_)));
        nav.assert_async().await;
    }

    #[tokio::test]
    async fn test_transport_error_retried_then_raised() {
        let mut server = mockito::Server::new_async().await;
        let endpoint = server
            .mock("GET", "/x/web-interface/view")
            .match_query(Matcher::UrlEncoded("bvid".into(), "BV1xx411c7mD".into()))
            .with_status(503)
            .with_body(r#"{"code":0,"data":{}}"#)
            .expect(3)
            .create_async()
            .await;

        let client = anonymous_client(&server);
        let err = client
            .fetch_unsigned("/x/web-interface/view", &[("bvid", "BV1xx411c7mD")])
            .await
            .unwrap_err();

        // 2xx以外はエンベロープを見ずにトランスポートエラー
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.status(), Some(503));
        endpoint.assert_async().await;

        let stats = client.retry_stats();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn test_fetch_unsigned_generic_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        let _endpoint = server
            .mock("GET", "/x/web-interface/view")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":-400,"message":"请求错误"}"#)
            .create_async()
            .await;

        let client = anonymous_client(&server);
        match client.fetch_unsigned("/x/web-interface/view", &[]).await {
            Err(BiliError::Upstream { code, message }) => {
                assert_eq!(code, -400);
                assert_eq!(message, "请求错误");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auth_headers_are_attached() {
        let mut server = mockito::Server::new_async().await;
        let endpoint = server
            .mock("GET", "/x/web-interface/view")
            .match_query(Matcher::Any)
            .match_header("cookie", Matcher::Regex("SESSDATA=sess-token-value".to_string()))
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"title":"ok"}}"#)
            .expect(1)
            .create_async()
            .await;

        let credentials = StaticCredentials::new(Some(CookieCredentials::new(
            "sess-token-value".to_string(),
            "csrf".to_string(),
            "42".to_string(),
        )));
        let client = BiliClient::new(test_config(server.url()), Arc::new(credentials)).unwrap();

        assert!(client.is_logged_in());
        let data = client.fetch_unsigned("/x/web-interface/view", &[]).await.unwrap();
        assert_eq!(data["title"], "ok");
        endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_raw_returns_body_without_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _endpoint = server
            .mock("GET", "/bfs/subtitle/1.json")
            .with_status(200)
            .with_body(r#"{"body":[{"from":0.0,"to":1.0,"location":2,"content":"你好"}]}"#)
            .create_async()
            .await;

        let client = anonymous_client(&server);
        let url = format!("{}/bfs/subtitle/1.json", server.url());
        let data = client.fetch_raw(&url).await.unwrap();
        assert_eq!(data["body"][0]["content"], "你好");
    }

    #[tokio::test]
    async fn test_fetch_raw_not_found_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let endpoint = server
            .mock("GET", "/missing.json")
            .with_status(404)
            .expect(3)
            .create_async()
            .await;

        let client = anonymous_client(&server);
        let err = client
            .fetch_raw(&format!("{}/missing.json", server.url()))
            .await
            .unwrap_err();

        // トランスポート種別なので上限まで再試行し、最後のステータスを返す
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.status(), Some(404));
        endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_raw_not_found_without_transport_retry() {
        let mut server = mockito::Server::new_async().await;
        let endpoint = server
            .mock("GET", "/missing.json")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        // 種類での再試行を外すと、許可リスト外のステータスは1回で終わる
        let mut config = test_config(server.url());
        config.retry.retryable_kinds = vec![ErrorKind::Timeout];
        let client = BiliClient::new(config, Arc::new(Anonymous)).unwrap();

        let err = client
            .fetch_raw(&format!("{}/missing.json", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalid_auth_header_fails_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let endpoint = server
            .mock("GET", "/x/web-interface/view")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":0,"data":{}}"#)
            .expect(0)
            .create_async()
            .await;

        let credentials = StaticCredentials::new(Some(CookieCredentials::new(
            "broken\nvalue".to_string(),
            "csrf".to_string(),
            "42".to_string(),
        )));
        let client = BiliClient::new(test_config(server.url()), Arc::new(credentials)).unwrap();

        let err = client.fetch_unsigned("/x/web-interface/view", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(client.retry_stats().attempts, 1);
        endpoint.assert_async().await;
    }

    #[test]
    fn test_api_url_joins_path() {
        let client = BiliClient::new(
            test_config("https://api.bilibili.com/".to_string()),
            Arc::new(Anonymous),
        )
        .unwrap();
        assert_eq!(
            client.api_url("/x/web-interface/nav"),
            "https://api.bilibili.com/x/web-interface/nav"
        );
        assert_eq!(client.api_url("x/v2/reply"), "https://api.bilibili.com/x/v2/reply");
    }
}

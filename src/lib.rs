pub mod bilibili;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod util; // doctestのためpubにする

use std::sync::Arc;

pub use bilibili::{BiliClient, BiliError, BilibiliApi, ErrorKind};
pub use config::Config;
pub use credentials::{Anonymous, CredentialProvider, StaticCredentials};

/// 設定と認証情報からAPIを組み立てる
///
/// クライアント（ゲート・鍵キャッシュを含む）はプロセスで1つだけ作成すること。
pub fn build_api(
    config: Config,
    credentials: Arc<dyn CredentialProvider>,
) -> Result<BilibiliApi, BiliError> {
    let client = Arc::new(BiliClient::new(config, credentials)?);
    log::info!("Bilibili client initialized: {:?}", client);
    Ok(BilibiliApi::new(client))
}

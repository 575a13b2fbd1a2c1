use crate::error::CapabilityError;
use async_trait::async_trait;

/// テキスト生成バックエンドの共通トレイト
///
/// 自由形式のプロンプトを受け取り、JSON または文章を返す。
/// 呼び出し側は JSON の抽出を試み、失敗した場合はフォールバックする。
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, CapabilityError>;
}

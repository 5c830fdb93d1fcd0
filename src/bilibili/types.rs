use serde::{Deserialize, Serialize};

// Bilibili API レスポンス型
// 上流のフィールド追加・欠落に耐えるよう、ほぼすべて default 付き

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoInfo {
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub aid: u64,
    #[serde(default)]
    pub cid: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub pic: Option<String>,
    /// 再生時間（秒）
    #[serde(default)]
    pub duration: u64,
    /// 公開日時（UNIX秒）
    #[serde(default)]
    pub pubdate: i64,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default)]
    pub stat: VideoStat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Owner {
    #[serde(default)]
    pub mid: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub face: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoStat {
    #[serde(default)]
    pub view: u64,
    #[serde(default)]
    pub danmaku: u64,
    #[serde(default)]
    pub reply: u64,
    #[serde(default)]
    pub favorite: u64,
    #[serde(default)]
    pub coin: u64,
    #[serde(default)]
    pub share: u64,
    #[serde(default)]
    pub like: u64,
}

/// `/x/player/wbi/v2` のレスポンス
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerInfo {
    #[serde(default)]
    pub subtitle: SubtitleList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubtitleList {
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubtitleTrack {
    #[serde(default)]
    pub id: u64,
    /// 言語コード（zh-Hans, en, ai-zh など）
    #[serde(default)]
    pub lan: String,
    /// 表示用の言語名
    #[serde(default)]
    pub lan_doc: String,
    /// スキームなしのURLで返ることがある
    #[serde(default)]
    pub subtitle_url: String,
}

/// 字幕本体（エンベロープなしのJSON）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubtitleContent {
    #[serde(default)]
    pub body: Vec<SubtitleLine>,
}

impl SubtitleContent {
    /// 全行を改行で連結したテキスト
    pub fn plain_text(&self) -> String {
        self.body
            .iter()
            .map(|line| line.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubtitleLine {
    #[serde(default)]
    pub from: f64,
    #[serde(default)]
    pub to: f64,
    #[serde(default)]
    pub location: u32,
    #[serde(default)]
    pub content: String,
}

/// `/x/v2/reply` のレスポンス
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommentPage {
    #[serde(default)]
    pub page: PageInfo,
    /// 上流は `null` を返すことがある
    #[serde(default, deserialize_with = "null_as_empty")]
    pub replies: Vec<Comment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PageInfo {
    #[serde(default)]
    pub num: u32,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    #[serde(default)]
    pub rpid: u64,
    #[serde(default)]
    pub member: CommentMember,
    #[serde(default)]
    pub content: CommentContent,
    #[serde(default)]
    pub like: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub replies: Vec<Comment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommentMember {
    #[serde(default)]
    pub uname: String,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommentContent {
    #[serde(default)]
    pub message: String,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_video_info_tolerates_missing_fields() {
        let info: VideoInfo = serde_json::from_value(json!({
            "bvid": "BV1xx411c7mD",
            "aid": 2,
            "cid": 62131,
            "title": "字幕君交流场所",
            "owner": { "mid": 2, "name": "碧诗" }
        }))
        .unwrap();
        assert_eq!(info.cid, 62131);
        assert_eq!(info.owner.name, "碧诗");
        assert_eq!(info.stat.view, 0);
        assert!(info.pic.is_none());
    }

    #[test]
    fn test_comment_page_null_replies() {
        let page: CommentPage = serde_json::from_value(json!({
            "page": { "num": 1, "size": 20, "count": 0 },
            "replies": null
        }))
        .unwrap();
        assert!(page.replies.is_empty());
    }

    #[test]
    fn test_nested_replies() {
        let page: CommentPage = serde_json::from_value(json!({
            "replies": [{
                "rpid": 1,
                "member": { "uname": "a" },
                "content": { "message": "05:20 高能" },
                "like": 10,
                "replies": [{ "rpid": 2, "content": { "message": "+1" }, "replies": null }]
            }]
        }))
        .unwrap();
        assert_eq!(page.replies[0].replies[0].content.message, "+1");
    }

    #[test]
    fn test_subtitle_plain_text() {
        let content: SubtitleContent = serde_json::from_value(json!({
            "body": [
                { "from": 0.0, "to": 1.5, "location": 2, "content": "大家好" },
                { "from": 1.5, "to": 3.0, "location": 2, "content": "欢迎收看" }
            ]
        }))
        .unwrap();
        assert_eq!(content.plain_text(), "大家好\n欢迎收看");
    }
}

//! # プレーンテキスト変換
//!
//! レンダリング済みの HTML からメールのプレーンテキストパートを導出する。
//!
//! ## 変換手順
//!
//! 1. `<script>` / `<style>` ブロックを中身ごと削除
//! 2. `<br>` を改行、`</p>` を空行に置換
//! 3. 残りのタグをすべて削除
//! 4. HTML エンティティ（名前付き・10 進・16 進）を復元
//! 5. 3 行以上連続する改行を 2 行に詰め、前後の空白を除去
//! 6. 結果が空なら `(no content)` を返す

use std::sync::LazyLock;

use regex::Regex;

/// 変換結果が空だった場合のプレースホルダー
pub const EMPTY_PLACEHOLDER: &str = "(no content)";

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>").unwrap()
});
static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static PARAGRAPH_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</p\s*>").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// HTML をプレーンテキストに変換する
pub fn to_plain_text(html: &str) -> String {
    let text = SCRIPT_OR_STYLE.replace_all(html, "");
    let text = LINE_BREAK.replace_all(&text, "\n");
    let text = PARAGRAPH_END.replace_all(&text, "\n\n");
    let text = TAG.replace_all(&text, "");
    let text = html_escape::decode_html_entities(&text);
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");

    match text.trim() {
        "" => EMPTY_PLACEHOLDER.to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn scriptとstyleは中身ごと削除される() {
        let html = r#"<STYLE type="text/css">
            p { color: red; }
        </STYLE><p>本文</p><script>
            alert("x");
        </Script >"#;

        assert_eq!(to_plain_text(html), "本文");
    }

    #[rstest]
    #[case("a<br>b", "a\nb")]
    #[case("a<br/>b", "a\nb")]
    #[case("a<BR />b", "a\nb")]
    #[case("<p>one</p><p>two</p>", "one\n\ntwo")]
    fn 改行タグと段落が改行になる(#[case] html: &str, #[case] expected: &str) {
        assert_eq!(to_plain_text(html), expected);
    }

    #[test]
    fn タグを除去してエンティティを復元する() {
        let html = r#"<div class="x"><a href="https://example.com">Tom &amp; Jerry</a> &lt;3 &#39;quoted&#39; &#x263A;</div>"#;

        assert_eq!(to_plain_text(html), "Tom & Jerry <3 'quoted' ☺");
    }

    #[test]
    fn 連続する改行は2行に詰められる() {
        let html = "<p>first</p>\n\n\n<p>second</p>\n\n\n\n";

        assert_eq!(to_plain_text(html), "first\n\nsecond");
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("<div><span></span></div>")]
    #[case("<style>body {}</style>")]
    fn 空の結果はプレースホルダーになる(#[case] html: &str) {
        assert_eq!(to_plain_text(html), EMPTY_PLACEHOLDER);
    }

    #[rstest]
    #[case("Hello World")]
    #[case("line one\nline two\n\nparagraph")]
    #[case("  surrounded by spaces  ")]
    fn マークアップのないテキストでは冪等(#[case] text: &str) {
        let once = to_plain_text(text);
        let twice = to_plain_text(&once);

        assert_eq!(once, twice);
    }
}

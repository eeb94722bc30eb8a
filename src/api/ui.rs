//! Web UI
//!
//! GET / 返回内嵌的单页模板

use axum::{extract::State, response::Html, routing::get, Router};
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::state::AppState;

const INDEX_TEMPLATE: &str = include_str!("../../assets/index.html");

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(index))
}

async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(render(&state))
}

/// 替换模板占位符
fn render(state: &AppState) -> String {
    INDEX_TEMPLATE
        .replace("{{ version }}", VERSION)
        .replace(
            "{{ workspace_root_js }}",
            &js_string(&state.config.workspace_root.display().to_string()),
        )
        .replace(
            "{{ workspace_root }}",
            &html_escape(&state.config.workspace_root.display().to_string()),
        )
        .replace(
            "{{ containerized }}",
            if state.config.containerized { "true" } else { "false" },
        )
        .replace("{{ registry }}", &html_escape(&state.config.docker.registry))
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// 作为 `<script>` 内的 JS 字符串字面量输出
fn js_string(text: &str) -> String {
    serde_json::Value::from(text).to_string().replace("</", "<\\/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvConfig;

    #[test]
    fn test_render_fills_placeholders() {
        let state = AppState::with_config(EnvConfig::default()).unwrap();
        let page = render(&state);
        assert!(page.contains(VERSION));
        assert!(page.contains("/workspace"));
        assert!(!page.contains("{{ version }}"));
        assert!(!page.contains("{{ workspace_root }}"));
        assert!(page.contains("const WORKSPACE_ROOT = \"/workspace\";"));
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<a href=\"x\">&"), "&lt;a href=&quot;x&quot;&gt;&amp;");
        assert_eq!(html_escape("it's"), "it&#39;s");
    }

    #[test]
    fn test_js_string_quotes_and_closes_script() {
        assert_eq!(js_string("/data/o'neil"), r#""/data/o'neil""#);
        assert_eq!(js_string("a</script>"), r#""a<\/script>""#);
        assert_eq!(js_string("C:\\work"), r#""C:\\work""#);
    }
}

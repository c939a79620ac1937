// Jupyterノートブックの表示用加工

use std::collections::HashSet;
use std::sync::LazyLock;

use ammonia::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// 入力セルの表示モード
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotebookDisplayMode {
    /// ノートブック側の`source_hidden`に従う
    #[default]
    Default,
    Hidden,
    Shown,
}

/// 表示モードに合わせて`hide_input`を設定したコピーを返す
pub fn tweak_cell_metadata(notebook: &Value, mode: NotebookDisplayMode) -> Value {
    let mut result = notebook.clone();

    if let Some(cells) = result.get_mut("cells").and_then(Value::as_array_mut) {
        for cell in cells {
            let hide = match mode {
                NotebookDisplayMode::Default if source_hidden(cell) => true,
                NotebookDisplayMode::Default => continue,
                NotebookDisplayMode::Hidden => true,
                NotebookDisplayMode::Shown => false,
            };
            set_hide_input(cell, hide);
        }
    }

    if mode == NotebookDisplayMode::Shown {
        set_hide_input(&mut result, false);
    }
    result
}

fn source_hidden(cell: &Value) -> bool {
    cell.pointer("/metadata/jupyter/source_hidden")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn set_hide_input(target: &mut Value, hide: bool) {
    let Some(object) = target.as_object_mut() else {
        return;
    };
    let metadata = object.entry("metadata").or_insert_with(|| json!({}));
    if let Some(metadata) = metadata.as_object_mut() {
        metadata.insert("hide_input".to_string(), json!(hide));
    }
}

// スクリプト系の要素・イベント属性を落とし、URLはhttp/https/mailtoのみ許可
static SANITIZER: LazyLock<Builder<'static>> = LazyLock::new(|| {
    let mut builder = Builder::default();
    builder
        .link_rel(None)
        .url_schemes(HashSet::from(["http", "https", "mailto"]));
    builder
});

/// HTML断片から実行可能な部分を取り除く
pub fn sanitize_html(html: &str) -> String {
    SANITIZER.clean(html).to_string()
}

/// `text/html`出力をサニタイズしたコピーを返す（1要素の配列として格納）
pub fn sanitize_notebook(notebook: &Value) -> Value {
    let mut result = notebook.clone();
    let Some(cells) = result.get_mut("cells").and_then(Value::as_array_mut) else {
        return result;
    };

    let outputs = cells
        .iter_mut()
        .filter_map(|cell| cell.get_mut("outputs").and_then(Value::as_array_mut))
        .flatten();

    for output in outputs {
        let Some(html) = output.pointer_mut("/data/text~1html") else {
            continue;
        };
        let joined = match html {
            Value::String(text) => text.clone(),
            Value::Array(lines) => lines.iter().filter_map(Value::as_str).collect(),
            _ => continue,
        };
        *html = json!([sanitize_html(&joined)]);
    }
    result
}

//! Browser UI for senders.
//!
//! Assets are compiled into the binary. `--web-dir` serves them from disk
//! instead, which is handy while editing the page.

use std::path::Path;

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::services::{ServeDir, ServeFile};
use tracing::info;

const INDEX_HTML: &str = include_str!("../static/index.html");
const SCRIPT_JS: &str = include_str!("../static/script.js");
const STYLE_CSS: &str = include_str!("../static/style.css");

pub fn ui_router<S>(web_dir: Option<&Path>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    match web_dir {
        Some(dir) => {
            info!("Serving web UI from {}", dir.display());
            Router::new()
                .route_service("/", ServeFile::new(dir.join("index.html")))
                .nest_service("/static", ServeDir::new(dir))
        }
        None => Router::new()
            .route("/", get(index))
            .route("/static/script.js", get(script))
            .route("/static/style.css", get(style)),
    }
}

async fn index() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], INDEX_HTML)
}

async fn script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        SCRIPT_JS,
    )
}

async fn style() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], STYLE_CSS)
}

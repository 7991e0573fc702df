//! Server-side page rendering
//!
//! Templates are compiled into the binary and registered once.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use handlebars::Handlebars;
use lazy_static::lazy_static;
use serde::Serialize;

const PARTIALS: &[(&str, &str)] = &[
    ("header", include_str!("./static/header.html")),
    ("footer", include_str!("./static/footer.html")),
    ("notice", include_str!("./static/notice.html")),
];

const PAGES: &[(&str, &str)] = &[
    ("landing", include_str!("./static/landing.html")),
    ("signin", include_str!("./static/signin.html")),
    ("privacy", include_str!("./static/privacy.html")),
    ("drive", include_str!("./static/drive.html")),
    ("file", include_str!("./static/file.html")),
];

lazy_static! {
    static ref TEMPLATES: Handlebars<'static> = build_registry();
}

fn build_registry() -> Handlebars<'static> {
    let mut registry = Handlebars::new();

    for (name, source) in PARTIALS {
        if let Err(e) = registry.register_partial(name, *source) {
            log::error!("Failed to register partial {}: {}", name, e);
        }
    }
    for (name, source) in PAGES {
        if let Err(e) = registry.register_template_string(name, *source) {
            log::error!("Failed to register template {}: {}", name, e);
        }
    }

    registry
}

/// Render a page, or a 500 if the template fails
pub fn render<T: Serialize>(name: &str, data: &T) -> Response {
    match TEMPLATES.render(name, data) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            log::error!("Failed to render {}: {}", name, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render page").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_page_is_registered() {
        for (name, _) in PAGES {
            assert!(TEMPLATES.has_template(name), "missing template {}", name);
        }
    }

    #[test]
    fn values_are_escaped() {
        let html = TEMPLATES
            .render(
                "signin",
                &serde_json::json!({ "title": "Sign in", "error": "<script>x</script>" }),
            )
            .unwrap();
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>x"));
    }
}

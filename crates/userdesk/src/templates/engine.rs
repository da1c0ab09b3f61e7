//! Compiled view set. Every page is parsed once at startup, so a broken
//! template fails the boot rather than the first request that needs it.

use anyhow::{Context, Result};
use minijinja::{AutoEscape, Environment, Value};

use crate::api::{ApiError, ApiResult};

/// (name, source) for every page the handlers render.
const PAGES: &[(&str, &str)] = &[
    ("layout.html", include_str!("../../templates/layout.html")),
    ("_form_errors.html", include_str!("../../templates/_form_errors.html")),
    ("users/index.html", include_str!("../../templates/users/index.html")),
    ("users/create.html", include_str!("../../templates/users/create.html")),
    ("users/show.html", include_str!("../../templates/users/show.html")),
    ("users/edit.html", include_str!("../../templates/users/edit.html")),
    ("profile/edit.html", include_str!("../../templates/profile/edit.html")),
];

pub struct Views {
    env: Environment<'static>,
}

impl Views {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|name| {
            if name.ends_with(".html") {
                AutoEscape::Html
            } else {
                AutoEscape::None
            }
        });

        for &(name, source) in PAGES {
            env.add_template(name, source)
                .with_context(|| format!("compiling view {name}"))?;
        }

        Ok(Self { env })
    }

    pub fn render(&self, name: &str, ctx: Value) -> ApiResult<String> {
        self.env
            .get_template(name)
            .and_then(|view| view.render(ctx))
            .map_err(|e| ApiError::internal(format!("Failed to render {name}: {e:#}")))
    }
}

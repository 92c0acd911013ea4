//! Static pages and the generated API description.

use super::RouteSpec;
use serde_json::{json, Map, Value};

const TITLE: &str = "Summarizer";

pub fn openapi_document(routes: &[RouteSpec]) -> Value {
	let mut paths = Map::new();
	for route in routes {
		let entry = paths
			.entry(route.path.to_string())
			.or_insert_with(|| Value::Object(Map::new()));
		if let Value::Object(methods) = entry {
			methods.insert(
				route.method.to_lowercase(),
				json!({ "operationId": route.name, "summary": route.name.replace('_', " ") }),
			);
		}
	}

	json!({
		"openapi": "3.0.2",
		"info": { "title": TITLE, "version": env!("CARGO_PKG_VERSION") },
		"paths": paths,
	})
}

pub fn swagger_ui() -> String {
	format!(
		r#"<!DOCTYPE html>
<html>
<head>
<link type="text/css" rel="stylesheet" href="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui.css">
<title>{title} - Swagger UI</title>
</head>
<body>
<div id="swagger-ui"></div>
<script src="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
<script>
const ui = SwaggerUIBundle({{
    url: '/openapi.json',
    oauth2RedirectUrl: window.location.origin + '/docs/oauth2-redirect',
    dom_id: '#swagger-ui',
}})
</script>
</body>
</html>"#,
		title = TITLE
	)
}

pub const OAUTH2_REDIRECT: &str = r#"<!DOCTYPE html>
<html lang="en-US">
<head><title>Swagger UI: OAuth2 Redirect</title></head>
<body>
<script>
    'use strict';
    var oauth2 = window.opener.swaggerUIRedirectOauth2;
    var qp = new URLSearchParams(window.location.hash.substring(1) || window.location.search.substring(1));
    oauth2.callback({ auth: oauth2.auth, token: Object.fromEntries(qp), isValid: true });
    window.close();
</script>
</body>
</html>"#;

pub fn redoc() -> String {
	format!(
		r#"<!DOCTYPE html>
<html>
<head>
<title>{title} - ReDoc</title>
<meta charset="utf-8"/>
</head>
<body>
<redoc spec-url="/openapi.json"></redoc>
<script src="https://cdn.jsdelivr.net/npm/redoc@next/bundles/redoc.standalone.js"></script>
</body>
</html>"#,
		title = TITLE
	)
}

pub fn index() -> String {
	format!(
		r#"<!DOCTYPE html>
<html>
<head><title>{title}</title></head>
<body>
<h1>{title}</h1>
<p><a href="/model-form">Choose a model</a></p>
<form id="upload">
<textarea name="text" rows="20" cols="80"></textarea>
<button type="submit">Upload</button>
</form>
<script>
document.getElementById('upload').addEventListener('submit', async (event) => {{
    event.preventDefault();
    await fetch('/uploadfile', {{ method: 'POST', body: event.target.text.value }});
}});
</script>
</body>
</html>"#,
		title = TITLE
	)
}

pub fn model_form(action: &str, models: &[String]) -> String {
	let options: String = models
		.iter()
		.map(|model| {
			let model = escape_html(model);
			format!("<option value=\"{0}\">{0}</option>\n", model)
		})
		.collect();

	format!(
		r#"<!DOCTYPE html>
<html>
<head><title>{title} - Models</title></head>
<body>
<form method="post" action="{action}">
<select name="model">
{options}</select>
<button type="submit">Load</button>
</form>
</body>
</html>"#,
		title = TITLE,
		action = action,
		options = options
	)
}

fn escape_html(text: &str) -> String {
	text.replace('&', "&amp;")
		.replace('<', "&lt;")
		.replace('>', "&gt;")
		.replace('"', "&quot;")
}

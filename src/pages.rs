use axum::{extract::Query, response::Html, routing::get, Router};
use serde::Deserialize;

use crate::state::AppState;

const LOGIN_PAGE: &str = r#"<!doctype html>
<html><head><meta charset="utf-8"><title>Sign in</title></head>
<body data-next="{{NEXT}}">
<h1>Sign in</h1>
<form id="login">
  <input name="username" placeholder="Username" autocomplete="username" required>
  <input name="password" type="password" placeholder="Password" autocomplete="current-password" required>
  <button type="submit">Sign in</button>
</form>
<p><a href="/api/auth/google">Sign in with Google</a> &middot; <a href="/register">Create an account</a></p>
<p id="msg"></p>
<script>
document.getElementById('login').onsubmit = async (e) => {
  e.preventDefault();
  const body = Object.fromEntries(new FormData(e.target));
  const res = await fetch('/api/auth/login', {method: 'POST', headers: {'Content-Type': 'application/json'}, body: JSON.stringify(body)});
  if (res.ok) {
    location.href = document.body.dataset.next;
  } else {
    document.getElementById('msg').textContent = (await res.json()).error;
  }
};
</script>
</body></html>
"#;

const REGISTER_PAGE: &str = r#"<!doctype html>
<html><head><meta charset="utf-8"><title>Register</title></head>
<body>
<h1>Register</h1>
<form id="register">
  <input name="username" placeholder="Username" required>
  <input name="email" type="email" placeholder="Email" required>
  <input name="password" type="password" placeholder="Password (min 6 characters)" minlength="6" required>
  <button type="submit">Register</button>
</form>
<p><a href="/login">Back to sign in</a></p>
<p id="msg"></p>
<script>
document.getElementById('register').onsubmit = async (e) => {
  e.preventDefault();
  const body = Object.fromEntries(new FormData(e.target));
  const res = await fetch('/api/auth/register', {method: 'POST', headers: {'Content-Type': 'application/json'}, body: JSON.stringify(body)});
  const json = await res.json();
  if (res.ok) { location.href = '/login'; } else { document.getElementById('msg').textContent = json.error; }
};
</script>
</body></html>
"#;

const HOME_PAGE: &str = r#"<!doctype html>
<html><head><meta charset="utf-8"><title>Logistics</title></head>
<body>
<h1>Logistics</h1>
<ul>
  <li><a href="/api/logistics">Records missing a container id</a></li>
  <li><a href="/api/container-history">Container history</a></li>
</ul>
<form method="post" action="/api/auth/logout"><button type="submit">Sign out</button></form>
</body></html>
"#;

#[derive(Debug, Deserialize)]
struct LoginPageQuery {
    #[serde(rename = "callbackUrl")]
    callback_url: Option<String>,
}

/// Where to go after sign-in. Only paths on this origin are followed;
/// anything else (absolute URLs, `//host`, `/\host`, `javascript:`) falls
/// back to `/`.
pub fn local_redirect_target(raw: Option<&str>) -> &str {
    match raw {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.starts_with("/\\")
                && !path.chars().any(char::is_control) =>
        {
            path
        }
        _ => "/",
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

async fn login_page(Query(query): Query<LoginPageQuery>) -> Html<String> {
    let next = local_redirect_target(query.callback_url.as_deref());
    Html(LOGIN_PAGE.replace("{{NEXT}}", &escape_attr(next)))
}

pub fn page_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(|| async { Html(HOME_PAGE) }))
        .route("/login", get(login_page))
        .route("/register", get(|| async { Html(REGISTER_PAGE) }))
}

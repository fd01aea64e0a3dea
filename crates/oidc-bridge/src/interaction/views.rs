//! HTML views for the interaction screens.
//!
//! Every interpolated value is HTML-escaped.

use axum::http::StatusCode;
use serde_json::{Map, Value};

/// A screen the controller asks the HTTP layer to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    /// Credential entry.
    Login {
        uid: String,
        client_name: String,
        login_hint: Option<String>,
        flash: Option<String>,
    },
    /// Confirm the signed-in account or sign in as someone else.
    SelectAccount {
        uid: String,
        client_name: String,
        claims: Map<String, Value>,
    },
    /// Approve the requested scopes.
    Consent {
        uid: String,
        client_name: String,
        scopes: Vec<String>,
        missing_scopes: Vec<String>,
        claims: Vec<String>,
    },
    /// Fallback for prompts without a dedicated screen.
    Interaction {
        uid: String,
        client_name: String,
        prompt: String,
        details: Value,
    },
}

impl View {
    /// Template name, used in logs and tests.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::SelectAccount { .. } => "select_account",
            Self::Consent { .. } => "consent",
            Self::Interaction { .. } => "interaction",
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Login { uid, client_name, login_hint, flash } => {
                render_login(uid, client_name, login_hint.as_deref(), flash.as_deref())
            }
            Self::SelectAccount { uid, client_name, claims } => {
                render_select_account(uid, client_name, claims)
            }
            Self::Consent { uid, client_name, scopes, missing_scopes, claims } => {
                render_consent(uid, client_name, scopes, missing_scopes, claims)
            }
            Self::Interaction { uid, client_name, prompt, details } => {
                render_interaction(uid, client_name, prompt, details)
            }
        }
    }
}

fn render_login(uid: &str, client_name: &str, login_hint: Option<&str>, flash: Option<&str>) -> String {
    let flash_html = flash
        .map(|msg| format!(r#"<div class="flash">{}</div>"#, html_escape(msg)))
        .unwrap_or_default();
    let autofocus_login = if login_hint.is_some() { "" } else { " autofocus" };
    let autofocus_password = if login_hint.is_some() { " autofocus" } else { "" };

    let body = format!(
        r#"<h1>Sign-in</h1>
<p class="subtitle"><strong>{client_name}</strong> is asking you to sign in</p>
{flash_html}
<form method="POST" action="/interaction/{uid}/login" autocomplete="off">
<label for="loginId">Login ID</label>
<input type="text" id="loginId" name="loginId" value="{login_hint}" required{autofocus_login}>
<label for="password">Password</label>
<input type="password" id="password" name="password" required{autofocus_password}>
<button type="submit">Sign-in</button>
</form>
{abort}"#,
        client_name = html_escape(client_name),
        flash_html = flash_html,
        uid = html_escape(uid),
        login_hint = html_escape(login_hint.unwrap_or_default()),
        abort = abort_link(uid),
    );
    layout("Sign-in", &body)
}

fn render_select_account(uid: &str, client_name: &str, claims: &Map<String, Value>) -> String {
    let display = claims
        .get("loginId")
        .or_else(|| claims.get("sub"))
        .and_then(Value::as_str)
        .unwrap_or("your account");

    let body = format!(
        r#"<h1>Choose an account</h1>
<p class="subtitle"><strong>{client_name}</strong> wants to know which account to use</p>
<form method="POST" action="/interaction/{uid}/confirm">
<button type="submit">Continue as {display}</button>
</form>
<p class="subtitle">Or sign in with another account:</p>
<form method="POST" action="/interaction/{uid}/login" autocomplete="off">
<label for="loginId">Login ID</label>
<input type="text" id="loginId" name="loginId" required>
<label for="password">Password</label>
<input type="password" id="password" name="password" required>
<button type="submit" class="secondary">Sign-in</button>
</form>
{abort}"#,
        client_name = html_escape(client_name),
        uid = html_escape(uid),
        display = html_escape(display),
        abort = abort_link(uid),
    );
    layout("Choose an account", &body)
}

fn render_consent(
    uid: &str,
    client_name: &str,
    scopes: &[String],
    missing_scopes: &[String],
    claims: &[String],
) -> String {
    let list = |items: &[String]| {
        items.iter().map(|i| format!("<li>{}</li>", html_escape(i))).collect::<String>()
    };
    let new_scopes = if missing_scopes.is_empty() || missing_scopes == scopes {
        String::new()
    } else {
        format!("<p>Newly requested:</p><ul>{}</ul>", list(missing_scopes))
    };

    let body = format!(
        r#"<h1>Authorize</h1>
<p class="subtitle"><strong>{client_name}</strong> is requesting access</p>
<p>Scopes:</p>
<ul>{scopes}</ul>
{new_scopes}
<p>Claims:</p>
<ul>{claims}</ul>
<form method="POST" action="/interaction/{uid}/confirm">
<button type="submit">Continue</button>
</form>
{abort}"#,
        client_name = html_escape(client_name),
        scopes = list(scopes),
        new_scopes = new_scopes,
        claims = list(claims),
        uid = html_escape(uid),
        abort = abort_link(uid),
    );
    layout("Authorize", &body)
}

fn render_interaction(uid: &str, client_name: &str, prompt: &str, details: &Value) -> String {
    let details = serde_json::to_string_pretty(details).unwrap_or_default();

    let body = format!(
        r#"<h1>Authorize</h1>
<p class="subtitle"><strong>{client_name}</strong> needs one more step: <code>{prompt}</code></p>
<pre>{details}</pre>
{abort}"#,
        client_name = html_escape(client_name),
        prompt = html_escape(prompt),
        details = html_escape(&details),
        abort = abort_link(uid),
    );
    layout("Authorize", &body)
}

/// Render the generic error page.
#[must_use]
pub fn render_error_page(status: StatusCode, message: &str) -> String {
    let body = format!(
        r#"<h1>Something went wrong</h1>
<p class="subtitle">{status}</p>
<div class="flash">{message}</div>"#,
        status = html_escape(&status.to_string()),
        message = html_escape(message),
    );
    layout("Error", &body)
}

fn abort_link(uid: &str) -> String {
    format!(
        r#"<p class="cancel"><a href="/interaction/{}/abort">Cancel</a></p>"#,
        html_escape(uid)
    )
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>{title}</title>
<style>
body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: #f5f5f5; margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }}
.card {{ background: #fff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); padding: 32px; max-width: 400px; width: 100%; }}
h1 {{ font-size: 20px; margin: 0 0 8px; color: #333; }}
.subtitle {{ color: #666; font-size: 14px; margin: 0 0 24px; }}
.flash {{ background: #fee; border: 1px solid #c00; color: #c00; padding: 10px; border-radius: 4px; margin-bottom: 16px; }}
label {{ display: block; font-size: 14px; font-weight: 500; margin: 12px 0 6px; color: #333; }}
input {{ width: 100%; padding: 10px; border: 1px solid #ddd; border-radius: 4px; font-size: 14px; box-sizing: border-box; }}
button {{ width: 100%; padding: 10px; background: #4a90d9; color: #fff; border: none; border-radius: 4px; font-size: 14px; font-weight: 500; cursor: pointer; margin-top: 16px; }}
button.secondary {{ background: #888; }}
.cancel {{ text-align: center; font-size: 14px; margin-top: 16px; }}
pre {{ background: #f5f5f5; padding: 8px; overflow-x: auto; font-size: 12px; }}
</style>
</head>
<body>
<div class="card">
{body}
</div>
</body>
</html>"#,
        title = html_escape(title),
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

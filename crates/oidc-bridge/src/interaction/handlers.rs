//! HTTP handlers for the interaction screens.

use std::sync::Arc;

use axum::{
    Form,
    extract::{Path, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};

use super::controller::{LoginForm, Outcome};
use crate::error::AppError;
use crate::provider::{Resumption, SessionChange};
use crate::server::HttpState;

/// `GET /interaction/{uid}`
pub async fn handle_show(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    Path(uid): Path<String>,
) -> Result<Response, AppError> {
    let outcome = state.interactions.show(&uid).await?;
    Ok(respond(&state, jar, outcome))
}

/// `POST /interaction/{uid}/login`
pub async fn handle_login(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    Path(uid): Path<String>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let outcome = state.interactions.submit_login(&uid, form).await?;
    Ok(respond(&state, jar, outcome))
}

/// `POST /interaction/{uid}/confirm`
pub async fn handle_confirm(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    Path(uid): Path<String>,
) -> Result<Response, AppError> {
    let outcome = state.interactions.confirm(&uid).await?;
    Ok(respond(&state, jar, outcome))
}

/// `GET /interaction/{uid}/abort`
pub async fn handle_abort(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    Path(uid): Path<String>,
) -> Result<Response, AppError> {
    let outcome = state.interactions.abort(&uid).await?;
    Ok(respond(&state, jar, outcome))
}

/// Render a view, or follow a resume with `303 See Other` and apply the session change.
fn respond(state: &HttpState, jar: CookieJar, outcome: Outcome) -> Response {
    match outcome {
        Outcome::Render(view) => Html(view.render()).into_response(),
        Outcome::Resumed(Resumption { location, session }) => {
            let jar = match session {
                SessionChange::Keep => jar,
                SessionChange::Set(id) => jar.add(session_cookie(state, id)),
                SessionChange::Clear => {
                    jar.remove(Cookie::build(state.session_cookie.clone()).path("/"))
                }
            };
            (jar, Redirect::to(&location)).into_response()
        }
    }
}

fn session_cookie(state: &HttpState, session_id: String) -> Cookie<'static> {
    Cookie::build((state.session_cookie.clone(), session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.secure_cookies)
        .build()
}

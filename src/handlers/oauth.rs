//! Token endpoints and the HTML pages of the simulated login.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Form, Query, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::ApiError,
    login::{ConsentOutcome, LoginError, LoginSession},
    server::Emulator,
};

const OUT_OF_BAND: &str = "urn:ietf:wg:oauth:2.0:oob";
const SCOPE: &str = "read write default_read";

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub scope: &'static str,
    pub created_at: i64,
    pub company_id: i64,
}

/// Issues a fresh token pair for any grant. A known authorization code is
/// consumed and a live refresh token is rotated out, but neither is required.
pub async fn token(
    State(emulator): State<Arc<Emulator>>,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Form(form) = form?;
    let grant_type = form
        .grant_type
        .filter(|g| !g.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("grant_type is required".to_string()))?;

    if let Some(code) = form.code.as_deref() {
        let known = emulator.login.redeem_code(code)?;
        tracing::debug!(known, "Authorization code presented");
    }
    if let Some(refresh) = form.refresh_token.as_deref() {
        if emulator.tokens.validate_refresh(refresh)? {
            emulator.tokens.revoke(refresh)?;
            tracing::debug!("Refresh token rotated");
        }
    }

    let pair = emulator.tokens.issue_pair()?;
    tracing::info!(grant_type = %grant_type, "Token pair issued");

    Ok(Json(TokenResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: "Bearer",
        expires_in: pair.expires_in,
        scope: SCOPE,
        created_at: pair.created_at.unix_timestamp(),
        company_id: emulator.config.auth.company_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: Option<String>,
}

pub async fn revoke(
    State(emulator): State<Arc<Emulator>>,
    form: Result<Form<RevokeRequest>, FormRejection>,
) -> Result<Json<Value>, ApiError> {
    let Form(form) = form?;
    let token = form
        .token
        .ok_or_else(|| ApiError::InvalidRequest("token is required".to_string()))?;
    emulator.tokens.revoke(&token)?;
    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
    pub response_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CredentialsForm {
    pub session: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CodeForm {
    pub session: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsentForm {
    pub session: String,
    #[serde(default)]
    pub decision: String,
}

pub async fn authorize(
    State(emulator): State<Arc<Emulator>>,
    query: Result<Query<AuthorizeQuery>, QueryRejection>,
) -> Result<Html<String>, ApiError> {
    let Query(query) = query?;
    if let Some(response_type) = query.response_type.as_deref() {
        if response_type != "code" {
            tracing::debug!(response_type, "Ignoring unsupported response_type");
        }
    }

    let session = emulator.login.start(query.client_id, query.redirect_uri, query.state)?;
    Ok(credentials_page(&session.id, None))
}

pub async fn login(
    State(emulator): State<Arc<Emulator>>,
    form: Result<Form<CredentialsForm>, FormRejection>,
) -> Result<Response, ApiError> {
    let Form(form) = form?;
    match emulator.login.submit_credentials(&form.session, &form.email, &form.password) {
        Ok(session) => Ok(code_page(&session.id, None).into_response()),
        Err(LoginError::BadCredentials) => Ok((
            StatusCode::UNAUTHORIZED,
            credentials_page(&form.session, Some("Invalid email or password.")),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

pub async fn otp(
    State(emulator): State<Arc<Emulator>>,
    form: Result<Form<CodeForm>, FormRejection>,
) -> Result<Response, ApiError> {
    let Form(form) = form?;
    match emulator.login.submit_code(&form.session, &form.code) {
        Ok(session) => Ok(consent_page(&session).into_response()),
        Err(LoginError::BadCode) => Ok((
            StatusCode::UNAUTHORIZED,
            code_page(&form.session, Some("Invalid one-time code.")),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

pub async fn consent(
    State(emulator): State<Arc<Emulator>>,
    form: Result<Form<ConsentForm>, FormRejection>,
) -> Result<Response, ApiError> {
    let Form(form) = form?;
    let approve = form.decision == "approve";

    match emulator.login.consent(&form.session, approve)? {
        ConsentOutcome::Approved { session, code } => match redirect_target(&session) {
            Some(uri) => {
                let mut params = vec![("code", code.as_str())];
                if let Some(state) = session.state.as_deref() {
                    params.push(("state", state));
                }
                Ok(found(&with_query(uri, &params)))
            }
            None => Ok(code_issued_page(&code).into_response()),
        },
        ConsentOutcome::Denied { session } => match redirect_target(&session) {
            Some(uri) => {
                let mut params = vec![("error", "access_denied")];
                if let Some(state) = session.state.as_deref() {
                    params.push(("state", state));
                }
                Ok(found(&with_query(uri, &params)))
            }
            None => Ok((
                StatusCode::FORBIDDEN,
                page("Access denied", "<p>The application was not authorized.</p>"),
            )
                .into_response()),
        },
    }
}

fn redirect_target(session: &LoginSession) -> Option<&str> {
    session
        .redirect_uri
        .as_deref()
        .filter(|uri| !uri.is_empty() && *uri != OUT_OF_BAND)
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn with_query(uri: &str, params: &[(&str, &str)]) -> String {
    let separator = if uri.contains('?') { '&' } else { '?' };
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}{}{}", uri, separator, query)
}

/// RFC 3986 unreserved characters pass through, everything else is `%XX`.
fn percent_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len() * 2);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n{body}\n</body>\n</html>\n",
        title = escape_html(title),
        body = body,
    ))
}

fn error_line(error: Option<&str>) -> String {
    error
        .map(|e| format!("<p class=\"error\">{}</p>\n", escape_html(e)))
        .unwrap_or_default()
}

fn credentials_page(session_id: &str, error: Option<&str>) -> Html<String> {
    page(
        "Sign in",
        &format!(
            "{error}<form method=\"post\" action=\"/oauth/login\">\n\
             <input type=\"hidden\" name=\"session\" value=\"{session}\">\n\
             <label>Email <input type=\"email\" name=\"email\"></label>\n\
             <label>Password <input type=\"password\" name=\"password\"></label>\n\
             <button type=\"submit\">Sign in</button>\n</form>",
            error = error_line(error),
            session = escape_html(session_id),
        ),
    )
}

fn code_page(session_id: &str, error: Option<&str>) -> Html<String> {
    page(
        "Two-step verification",
        &format!(
            "{error}<form method=\"post\" action=\"/oauth/otp\">\n\
             <input type=\"hidden\" name=\"session\" value=\"{session}\">\n\
             <label>One-time code <input type=\"text\" name=\"code\" inputmode=\"numeric\"></label>\n\
             <button type=\"submit\">Verify</button>\n</form>",
            error = error_line(error),
            session = escape_html(session_id),
        ),
    )
}

fn consent_page(session: &LoginSession) -> Html<String> {
    let client = session.client_id.as_deref().unwrap_or("this application");
    page(
        "Authorize access",
        &format!(
            "<p>Allow <strong>{client}</strong> to access your company data?</p>\n\
             <form method=\"post\" action=\"/oauth/consent\">\n\
             <input type=\"hidden\" name=\"session\" value=\"{session}\">\n\
             <button type=\"submit\" name=\"decision\" value=\"approve\">Allow</button>\n\
             <button type=\"submit\" name=\"decision\" value=\"deny\">Deny</button>\n</form>",
            client = escape_html(client),
            session = escape_html(&session.id),
        ),
    )
}

fn code_issued_page(code: &str) -> Html<String> {
    page(
        "Authorization code",
        &format!(
            "<p>Copy this code into your application:</p>\n<pre id=\"code\">{}</pre>",
            escape_html(code)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("abc-._~XYZ09"), "abc-._~XYZ09");
        assert_eq!(percent_encode("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(percent_encode("é"), "%C3%A9");
    }

    #[test]
    fn test_with_query_appends_to_existing_query() {
        assert_eq!(
            with_query("http://localhost/cb", &[("code", "abc"), ("state", "x y")]),
            "http://localhost/cb?code=abc&state=x%20y"
        );
        assert_eq!(with_query("http://localhost/cb?app=1", &[("code", "abc")]), "http://localhost/cb?app=1&code=abc");
    }

    #[test]
    fn test_pages_escape_user_input() {
        let Html(body) = credentials_page("\"><script>", Some("<b>"));
        assert!(body.contains("value=\"&quot;&gt;&lt;script&gt;\""));
        assert!(body.contains("&lt;b&gt;"));
        assert!(!body.contains("<script>"));
    }
}

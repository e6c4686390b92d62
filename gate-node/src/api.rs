use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::app::{App, AuthRequest, ResourceRequest, ResourceResponse};
use crate::auth::AuthTokenRequest;
use crate::credential::UserPass;
use crate::error::{GateError, Result};

const ACTION_NAMES: [&str; 4] = ["GET", "HEAD", "PUT", "DELETE"];

const LOGIN_FORM: &str = r#"<html>
<head></head>
<body>
    <form method="post">
        <div>
            <label for="username">Username:</label><br>
            <input type="text" id="username" name="username"><br>
        </div>
        <div>
            <label for="password">Password:</label><br>
            <input type="password" id="password" name="password">
        </div>
        <div>
            <input type="submit" id="submit" />
        </div>
    </form>
</body>
</html>
"#;

/// Build the gateway router over a shared [`App`].
pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/__/login", get(get_login).post(post_login))
        .route("/__/logout", get(get_logout))
        .route("/__/whoami", get(get_whoami))
        .route("/__/auth_token_request", post(post_auth_token))
        .route("/__/access/:action/*resource", get(get_access))
        .route("/", get(get_root))
        .route(
            "/*resource",
            get(get_resource).head(head_resource).put(put_resource),
        )
        .with_state(app)
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn get_login() -> Html<&'static str> {
    Html(LOGIN_FORM)
}

async fn post_login(State(app): State<Arc<App>>, Form(form): Form<LoginForm>) -> Response {
    let userpass = UserPass::new(form.username, form.password);
    match app.login(&userpass) {
        Ok(Some(cookie)) => (
            [(
                header::SET_COOKIE,
                format!("{}={}; Path=/", cookie.name, cookie.value),
            )],
            "OK",
        )
            .into_response(),
        Ok(None) => Redirect::to("/__/login").into_response(),
        Err(err) => internal_error(err),
    }
}

async fn get_logout(State(app): State<Arc<App>>) -> Response {
    (
        [(
            header::SET_COOKIE,
            format!("{}=; Path=/; Max-Age=0", app.cookie_name()),
        )],
        "OK",
    )
        .into_response()
}

async fn get_whoami(State(app): State<Arc<App>>, headers: HeaderMap) -> String {
    app.authenticate(&auth_request(&app, &headers))
}

async fn post_auth_token(
    State(app): State<Arc<App>>,
    Json(request): Json<AuthTokenRequest>,
) -> Response {
    match app.auth_token(&request) {
        Ok(Some(token)) => Json(json!({
            "value": token.value,
            "headers": {
                "Authorization": format!("Bearer {}", token.value),
            },
        }))
        .into_response(),
        Ok(None) => Json(serde_json::Value::Null).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn get_access(
    State(app): State<Arc<App>>,
    Path((action, resource)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if !ACTION_NAMES.contains(&action.as_str()) {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }
    let request = ResourceRequest::new(action, resource, auth_request(&app, &headers));
    match app.check_access(&request) {
        Ok(decision) => to_response(decision),
        Err(err) => internal_error(err),
    }
}

async fn get_root(State(app): State<Arc<App>>, headers: HeaderMap) -> Response {
    dispatch(&app, "GET", String::new(), &headers, Vec::new(), App::resource_get)
}

async fn get_resource(
    State(app): State<Arc<App>>,
    Path(resource): Path<String>,
    headers: HeaderMap,
) -> Response {
    dispatch(&app, "GET", resource, &headers, Vec::new(), App::resource_get)
}

async fn head_resource(
    State(app): State<Arc<App>>,
    Path(resource): Path<String>,
    headers: HeaderMap,
) -> Response {
    dispatch(&app, "HEAD", resource, &headers, Vec::new(), App::resource_head)
}

async fn put_resource(
    State(app): State<Arc<App>>,
    Path(resource): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(
        &app,
        "PUT",
        resource,
        &headers,
        body.to_vec(),
        App::resource_put,
    )
}

fn dispatch(
    app: &App,
    action: &str,
    resource: String,
    headers: &HeaderMap,
    body: Vec<u8>,
    serve: impl FnOnce(&App, &ResourceRequest) -> Result<ResourceResponse>,
) -> Response {
    let request =
        ResourceRequest::new(action, resource, auth_request(app, headers)).with_body(body);
    match serve(app, &request) {
        Ok(response) => to_response(response),
        Err(err) => internal_error(err),
    }
}

fn auth_request(app: &App, headers: &HeaderMap) -> AuthRequest {
    AuthRequest {
        header: headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        cookie: cookie_value(headers, app.cookie_name()),
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn to_response(response: ResourceResponse) -> Response {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn internal_error(err: GateError) -> Response {
    error!(error = %err, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

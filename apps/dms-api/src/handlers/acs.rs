//! CWMP ACS 端点适配。
//!
//! axum 层只做字节与头的搬运：SOAP 解析、会话状态机、认证校验
//! 全部在 dms-cwmp 里。应答 `200` 携带下一条 RPC 信封，`204`
//! 表示本会话放空结束。

use crate::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use dms_cwmp::AcsRequest;

pub async fn cwmp_endpoint(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = AcsRequest {
        body: String::from_utf8_lossy(&body).to_string(),
        cookie_header: header_value(&headers, header::COOKIE),
        authorization: header_value(&headers, header::AUTHORIZATION),
        peer_ip: headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(',').next().unwrap_or(value).trim().to_string()),
        uri: uri.path().to_string(),
    };
    let acs_response = state.acs.handle(request).await;

    let mut builder = Response::builder().status(
        StatusCode::from_u16(acs_response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );
    if acs_response.body.is_some() {
        builder = builder.header(header::CONTENT_TYPE, "text/xml; charset=utf-8");
    }
    if let Some(set_cookie) = &acs_response.set_cookie {
        builder = builder.header(header::SET_COOKIE, set_cookie);
    }
    if let Some(challenge) = &acs_response.www_authenticate {
        builder = builder.header(header::WWW_AUTHENTICATE, challenge);
    }
    builder = builder
        .header(header::CACHE_CONTROL, "no-cache")
        .header("SOAPAction", "");

    builder
        .body(axum::body::Body::from(acs_response.body.unwrap_or_default()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

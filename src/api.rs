// src/api.rs

//! Control API
//!
//! Transport-agnostic request handling: a method and a path go in, a status
//! code and a JSON envelope come out. Every reply carries `error` and
//! `errorString`; operation-specific fields sit next to them.

use crate::error::Error;
use crate::manager::Manager;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

/// Version reported by the control API
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

const API_PREFIX: &str = "/api/v1/";

/// Response envelope
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub error: bool,
    #[serde(default)]
    pub error_string: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Response {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: true,
            error_string: message.into(),
            fields: Map::new(),
        }
    }

    /// Attach an operation-specific field
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }
}

/// Reply of `GET /api/v1/version`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

/// Status code and body handed back to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    fn json<T: Serialize>(status: u16, body: &T) -> Self {
        let body = serde_json::to_value(body)
            .unwrap_or_else(|e| json!({ "error": true, "errorString": e.to_string() }));
        Self { status, body }
    }

    fn success(response: Response) -> Self {
        Self::json(200, &response)
    }

    fn from_error(err: &Error) -> Self {
        Self::json(status_for(err), &Response::failure(error_string(err)))
    }
}

/// Message exposed to API callers for an error
pub fn error_string(err: &Error) -> String {
    match err {
        Error::NotFound(_) => "unknown resource".to_string(),
        Error::AlreadyExists(_) => "resource already exists".to_string(),
        Error::InvalidName(_)
        | Error::Conflict(_)
        | Error::InvalidPair(_)
        | Error::PreviouslyFailed(_)
        | Error::Corrupt { .. }
        | Error::Unimplemented(_)
        | Error::DeltaFailed { .. }
        | Error::Metadata { .. }
        | Error::Database(_)
        | Error::Io(_)
        | Error::InitError(_) => err.to_string(),
    }
}

/// HTTP status for an error
pub fn status_for(err: &Error) -> u16 {
    match err {
        Error::NotFound(_) => 404,
        Error::AlreadyExists(_) | Error::Conflict(_) | Error::PreviouslyFailed(_) => 409,
        Error::InvalidName(_) | Error::InvalidPair(_) | Error::Metadata { .. } => 400,
        Error::Unimplemented(_) => 501,
        Error::Corrupt { .. }
        | Error::DeltaFailed { .. }
        | Error::Database(_)
        | Error::Io(_)
        | Error::InitError(_) => 500,
    }
}

/// Dispatch one request
pub fn handle(manager: &Manager, method: &str, path: &str) -> Reply {
    debug!("{} {}", method, path);

    let Some(route) = path.strip_prefix(API_PREFIX) else {
        return Reply::json(404, &Response::failure(format!("no such route: {}", path)));
    };
    if !method.eq_ignore_ascii_case("GET") {
        return Reply::json(405, &Response::failure(format!("method not allowed: {}", method)));
    }

    let segments: Vec<&str> = route.trim_end_matches('/').split('/').collect();
    let result = match segments.as_slice() {
        ["version"] => {
            return Reply::json(
                200,
                &VersionResponse {
                    version: API_VERSION.to_string(),
                },
            );
        }
        ["create_repo", id] => manager.create_repo(id).map(|()| Response::ok()),
        ["index_repo", id] => manager.index(id).map(|()| Response::ok()),
        ["remove_repo", id] => manager.remove_repo(id).map(|()| Response::ok()),
        ["list_repos"] => manager
            .list_repos()
            .map(|repos| Response::ok().with("repos", json!(repos))),
        ["list_packages", id] => manager
            .get_package_names(id)
            .map(|names| Response::ok().with("packages", json!(names))),
        ["get_packages", id, name] => manager.get_packages(id, name).and_then(|packages| {
            let packages = serde_json::to_value(packages).map_err(|e| Error::Corrupt {
                bucket: "index".to_string(),
                key: id.to_string(),
                reason: e.to_string(),
            })?;
            Ok(Response::ok().with("packages", packages))
        }),
        ["delta_failed", delta_id] => manager
            .get_delta_failed(delta_id)
            .map(|failed| Response::ok().with("failed", json!(failed))),
        _ => {
            return Reply::json(404, &Response::failure(format!("no such route: {}", path)));
        }
    };

    match result {
        Ok(response) => Reply::success(response),
        Err(err) => {
            warn!("{} {} failed: {}", method, path, err);
            Reply::from_error(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Layout;
    use tempfile::TempDir;

    fn create_test_manager() -> (TempDir, Manager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = Manager::open_default(Layout::new(dir.path())).unwrap();
        (dir, manager)
    }

    fn envelope(reply: &Reply) -> Response {
        serde_json::from_value(reply.body.clone()).unwrap()
    }

    #[test]
    fn test_version() {
        let (_dir, manager) = create_test_manager();
        let reply = handle(&manager, "GET", "/api/v1/version");
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, json!({ "version": API_VERSION }));
    }

    #[test]
    fn test_create_repo_twice() {
        let (_dir, manager) = create_test_manager();

        let first = handle(&manager, "GET", "/api/v1/create_repo/shannon");
        assert_eq!(first.status, 200);
        assert_eq!(first.body, json!({ "error": false, "errorString": "" }));

        let second = handle(&manager, "GET", "/api/v1/create_repo/shannon");
        assert_eq!(second.status, 409);
        let body = envelope(&second);
        assert!(body.error);
        assert_eq!(body.error_string, "resource already exists");
    }

    #[test]
    fn test_index_unknown_repo() {
        let (_dir, manager) = create_test_manager();
        let reply = handle(&manager, "GET", "/api/v1/index_repo/nope");
        assert_eq!(reply.status, 404);
        assert_eq!(envelope(&reply).error_string, "unknown resource");
    }

    #[test]
    fn test_listing_routes() {
        let (_dir, manager) = create_test_manager();
        manager.create_repo("shannon").unwrap();

        let repos = handle(&manager, "GET", "/api/v1/list_repos");
        assert_eq!(repos.body["repos"], json!(["shannon"]));

        let packages = handle(&manager, "GET", "/api/v1/list_packages/shannon");
        assert_eq!(packages.body["packages"], json!([]));

        let builds = handle(&manager, "GET", "/api/v1/get_packages/shannon/foo");
        assert_eq!(builds.status, 200);
        assert_eq!(builds.body["packages"], json!([]));

        let failed = handle(&manager, "GET", "/api/v1/delta_failed/abc");
        assert_eq!(failed.body["failed"], json!(false));
    }

    #[test]
    fn test_unknown_route_and_method() {
        let (_dir, manager) = create_test_manager();

        let reply = handle(&manager, "GET", "/api/v1/frobnicate");
        assert_eq!(reply.status, 404);
        assert!(envelope(&reply).error);

        let reply = handle(&manager, "POST", "/api/v1/create_repo/shannon");
        assert_eq!(reply.status, 405);
        assert!(manager.list_repos().unwrap().is_empty());
    }

    #[test]
    fn test_error_strings() {
        assert_eq!(
            error_string(&Error::NotFound("x".to_string())),
            "unknown resource"
        );
        assert_eq!(
            error_string(&Error::AlreadyExists("x".to_string())),
            "resource already exists"
        );
        assert_eq!(
            error_string(&Error::PreviouslyFailed("d1".to_string())),
            "delta d1 previously failed"
        );
    }
}

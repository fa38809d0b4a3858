//! Procedure registry and version resolver.
//!
//! Registrations form a sparse log: each `(version, method)` pair is either
//! a live procedure or a tombstone. After every mutation the registry folds
//! that log forward in chronological order into a dense [`RouteTable`] and
//! swaps it in whole. Tables handed out by [`Registry::routes`] are never
//! mutated afterwards, so serving needs no locks.
//!
//! Resolution rules:
//!
//! - the earliest dated version resolves to exactly its live registrations;
//! - every later dated version starts from the previous one, then applies its
//!   own registrations (live ones insert or replace, tombstones remove);
//! - `latest` is the last dated version;
//! - `preview` holds exactly the preview registrations and is never folded.

use std::collections::BTreeMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde_json::Value;

use crate::context::{Call, Reply};
use crate::error::{ConfigError, RpcError};
use crate::handler::{BoxFuture, Handler, Procedure};
use crate::ident::{MethodName, Version};
use crate::middleware::{compose, Layers, Middleware, Schema, ValidateRequest, ValidateResponse};

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// One method at one version, plus its optional schemas and middleware.
pub struct Registration {
    method: String,
    version: String,
    procedure: Procedure,
    request_schema: Option<Result<Schema, ConfigError>>,
    response_schema: Option<Result<Schema, ConfigError>>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Registration {
    pub fn new(method: impl Into<String>, version: impl Into<String>, procedure: Procedure) -> Self {
        Self {
            method: method.into(),
            version: version.into(),
            procedure,
            request_schema: None,
            response_schema: None,
            middleware: Vec::new(),
        }
    }

    pub fn request_schema(mut self, schema: Value) -> Self {
        self.request_schema = Some(Schema::compile(schema));
        self
    }

    pub fn request_schema_for<T: JsonSchema>(mut self) -> Self {
        self.request_schema = Some(Schema::for_type::<T>());
        self
    }

    pub fn response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(Schema::compile(schema));
        self
    }

    pub fn response_schema_for<T: JsonSchema>(mut self) -> Self {
        self.response_schema = Some(Schema::for_type::<T>());
        self
    }

    /// Append a middleware; earlier ones wrap later ones.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }
}

/// A validated live registration.
struct Live {
    procedure: Procedure,
    request_schema: Option<Schema>,
    response_schema: Option<Schema>,
    middleware: Vec<Arc<dyn Middleware>>,
}

enum Entry {
    Live(Arc<Live>),
    Withdrawn,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Mutable registration side. Not meant to be shared while serving: build
/// it at start-up, then hand [`Registry::routes`] to the transport.
#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<Version, BTreeMap<MethodName, Entry>>,
    authentication: Option<Arc<dyn Middleware>>,
    global: Vec<Arc<dyn Middleware>>,
    routes: Arc<RouteTable>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("authenticated", &self.authentication.is_some())
            .field("global_middleware", &self.global.len())
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the authentication step every call passes through.
    pub fn authenticate(&mut self, middleware: impl Middleware) -> &mut Self {
        self.authentication = Some(Arc::new(middleware));
        self.rebuild();
        self
    }

    /// Append a server-wide middleware. Earlier ones wrap later ones.
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.global.push(Arc::new(middleware));
        self.rebuild();
        self
    }

    pub fn register(&mut self, registration: Registration) -> Result<&mut Self, ConfigError> {
        let (version, method) = self.claim(&registration.method, &registration.version)?;

        let procedure = registration.procedure;
        let request_schema = registration.request_schema.transpose()?;
        let response_schema = registration.response_schema.transpose()?;
        if request_schema.is_some() && !procedure.accepts_request() {
            return Err(ConfigError::UnexpectedRequestSchema {
                method: method.to_string(),
                version: version.to_string(),
            });
        }
        if response_schema.is_some() && !procedure.produces_response() {
            return Err(ConfigError::UnexpectedResponseSchema {
                method: method.to_string(),
                version: version.to_string(),
            });
        }

        tracing::debug!("[Registry] Registered {}@{}", method, version);
        let live = Live {
            procedure,
            request_schema,
            response_schema,
            middleware: registration.middleware,
        };
        self.entries
            .entry(version)
            .or_default()
            .insert(method, Entry::Live(Arc::new(live)));
        self.rebuild();
        Ok(self)
    }

    /// Tombstone `method` from `version` onwards.
    pub fn withdraw(&mut self, method: &str, version: &str) -> Result<&mut Self, ConfigError> {
        let (version, method) = self.claim(method, version)?;
        if version == Version::Preview {
            return Err(ConfigError::PreviewWithdrawal {
                method: method.to_string(),
            });
        }

        tracing::debug!("[Registry] Withdrew {}@{}", method, version);
        self.entries
            .entry(version)
            .or_default()
            .insert(method, Entry::Withdrawn);
        self.rebuild();
        Ok(self)
    }

    /// The current resolved table.
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.clone()
    }

    /// Checks shared by `register` and `withdraw`.
    fn claim(&self, method: &str, version: &str) -> Result<(Version, MethodName), ConfigError> {
        if self.authentication.is_none() {
            return Err(ConfigError::MissingAuthentication);
        }
        let method = MethodName::parse(method)?;
        let version = Version::parse(version)?;
        if version == Version::Latest {
            return Err(ConfigError::LatestNotRegistrable {
                method: method.to_string(),
            });
        }
        let taken = self
            .entries
            .get(&version)
            .is_some_and(|methods| methods.contains_key(&method));
        if taken {
            return Err(ConfigError::DuplicateRegistration {
                method: method.to_string(),
                version: version.to_string(),
            });
        }
        Ok((version, method))
    }

    fn layers_for(&self, live: &Live) -> Layers {
        let request_schema = live
            .request_schema
            .clone()
            .map(|s| Arc::new(ValidateRequest::new(s)) as Arc<dyn Middleware>);
        let response_schema = live
            .response_schema
            .clone()
            .map(|s| Arc::new(ValidateResponse::new(s)) as Arc<dyn Middleware>);
        Layers {
            global: self.global.clone(),
            per_registration: live.middleware.clone(),
            response_schema,
            request_schema,
            authentication: self.authentication.clone(),
        }
    }

    fn chain_for(&self, live: &Live) -> Handler {
        compose(live.procedure.handler().clone(), &self.layers_for(live))
    }

    fn rebuild(&mut self) {
        let mut versions = BTreeMap::new();
        let mut latest = None;
        let mut working = MethodSet::new();

        for (version, registrations) in &self.entries {
            match version {
                Version::Dated(_) => {
                    for (method, entry) in registrations {
                        match entry {
                            Entry::Live(live) => {
                                working.insert(method.clone(), self.chain_for(live));
                            }
                            Entry::Withdrawn => {
                                working.remove(method);
                            }
                        }
                    }
                    versions.insert(*version, Arc::new(working.clone()));
                    latest = Some(*version);
                }
                Version::Preview => {
                    let preview: MethodSet = registrations
                        .iter()
                        .filter_map(|(method, entry)| match entry {
                            Entry::Live(live) => Some((method.clone(), self.chain_for(live))),
                            Entry::Withdrawn => None,
                        })
                        .collect();
                    versions.insert(Version::Preview, Arc::new(preview));
                }
                Version::Latest => {}
            }
        }

        self.routes = Arc::new(RouteTable {
            versions,
            latest,
            authenticated: self.authentication.is_some(),
        });
    }
}

// ---------------------------------------------------------------------------
// Resolved table
// ---------------------------------------------------------------------------

type MethodSet = BTreeMap<MethodName, Handler>;

/// Immutable, fully materialized `version -> method -> handler` table.
#[derive(Debug, Default)]
pub struct RouteTable {
    versions: BTreeMap<Version, Arc<MethodSet>>,
    latest: Option<Version>,
    authenticated: bool,
}

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct Route {
    handler: Handler,
    version: Version,
}

impl Route {
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// The concrete version the request resolved to.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn call(&self, call: Call) -> BoxFuture<Result<Reply, RpcError>> {
        self.handler.call(call)
    }
}

impl RouteTable {
    /// Find the handler serving `method` at `version`.
    ///
    /// `not_found` carries `missing = version | method` in its metadata. A
    /// table built without authentication denies everything.
    pub fn lookup(&self, version: Version, method: &MethodName) -> Result<Route, RpcError> {
        if !self.authenticated {
            tracing::error!("[Registry] No authentication configured; refusing {}@{}", method, version);
            return Err(RpcError::access_denied());
        }
        let missing_version = || {
            RpcError::not_found()
                .with_meta("missing", "version")
                .with_meta("version", version)
        };

        let resolved = self.resolve(version).ok_or_else(missing_version)?;
        let methods = self.versions.get(&resolved).ok_or_else(missing_version)?;
        let handler = methods.get(method).ok_or_else(|| {
            RpcError::not_found()
                .with_meta("missing", "method")
                .with_meta("method", method)
                .with_meta("version", version)
        })?;
        Ok(Route {
            handler: handler.clone(),
            version: resolved,
        })
    }

    /// `latest` maps to the greatest dated version, anything else to itself.
    pub fn resolve(&self, version: Version) -> Option<Version> {
        match version {
            Version::Latest => self.latest,
            other => Some(other),
        }
    }

    /// Every servable version: dated ascending, then `preview`, then `latest`.
    pub fn versions(&self) -> Vec<Version> {
        let mut versions: Vec<Version> = self.versions.keys().copied().collect();
        if self.latest.is_some() {
            versions.push(Version::Latest);
        }
        versions
    }

    pub fn methods(&self, version: Version) -> Option<Vec<&MethodName>> {
        let resolved = self.resolve(version)?;
        self.versions
            .get(&resolved)
            .map(|methods| methods.keys().collect())
    }

    pub fn latest_version(&self) -> Option<Version> {
        self.latest
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::context::Context;
    use crate::error::codes;
    use crate::middleware::{from_fn, AllowAnonymous, ApiKeyAuth, Next};
    use http::{HeaderMap, HeaderValue, StatusCode};
    use serde_json::json;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn m(s: &str) -> MethodName {
        MethodName::parse(s).unwrap()
    }

    /// A procedure that answers with a fixed tag, so tests can tell
    /// registrations apart.
    fn tagged(tag: &'static str) -> Procedure {
        Procedure::returning(move |_ctx| async move { Ok::<_, RpcError>(tag) })
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.authenticate(AllowAnonymous);
        registry
    }

    fn names(routes: &RouteTable, version: &str) -> Vec<String> {
        routes
            .methods(v(version))
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.to_string())
            .collect()
    }

    async fn invoke(routes: &RouteTable, version: &str, method: &str) -> Result<Reply, RpcError> {
        let route = routes.lookup(v(version), &m(method))?;
        let ctx = Context::new(v(version), m(method)).resolved_as(route.version());
        route.call(Call::new(ctx, Body::empty())).await
    }

    async fn tag_of(routes: &RouteTable, version: &str, method: &str) -> String {
        let reply = invoke(routes, version, method).await.unwrap();
        serde_json::from_slice(reply.body()).unwrap()
    }

    #[test]
    fn test_methods_carry_forward() {
        let mut registry = registry();
        registry
            .register(Registration::new("ping", "2020-01-01", tagged("ping")))
            .unwrap();
        registry
            .register(Registration::new("greet", "2020-02-01", tagged("greet")))
            .unwrap();
        let routes = registry.routes();

        assert_eq!(names(&routes, "2020-01-01"), ["ping"]);
        assert_eq!(names(&routes, "2020-02-01"), ["greet", "ping"]);
        assert_eq!(names(&routes, "latest"), ["greet", "ping"]);
        assert_eq!(routes.latest_version(), Some(v("2020-02-01")));
    }

    #[test]
    fn test_withdrawn_method_stays_in_earlier_versions() {
        let mut registry = registry();
        registry
            .register(Registration::new("foo", "2019-01-01", tagged("foo")))
            .unwrap();
        registry.withdraw("foo", "2019-02-02").unwrap();
        let routes = registry.routes();

        assert_eq!(names(&routes, "2019-01-01"), ["foo"]);
        assert!(names(&routes, "2019-02-02").is_empty());
        assert!(names(&routes, "latest").is_empty());
        assert_eq!(routes.latest_version(), Some(v("2019-02-02")));
    }

    #[test]
    fn test_withdraw_then_reintroduce() {
        let mut registry = registry();
        registry
            .register(Registration::new("foo", "2019-01-01", tagged("foo")))
            .unwrap();
        registry.withdraw("foo", "2019-02-02").unwrap();
        registry
            .register(Registration::new("bar", "2019-02-15", tagged("bar")))
            .unwrap();
        registry
            .register(Registration::new("foo", "2019-03-03", tagged("foo")))
            .unwrap();
        let routes = registry.routes();

        assert_eq!(names(&routes, "2019-02-02"), Vec::<String>::new());
        assert_eq!(names(&routes, "2019-02-15"), ["bar"]);
        assert_eq!(names(&routes, "2019-03-03"), ["bar", "foo"]);
        assert_eq!(names(&routes, "latest"), ["bar", "foo"]);
    }

    #[tokio::test]
    async fn test_later_registration_overrides_behaviour() {
        let mut registry = registry();
        registry
            .register(Registration::new("foo", "2020-01-01", tagged("old")))
            .unwrap();
        registry
            .register(Registration::new("foo", "2021-01-01", tagged("new")))
            .unwrap();
        registry
            .register(Registration::new("bar", "2022-01-01", tagged("bar")))
            .unwrap();
        let routes = registry.routes();

        assert_eq!(tag_of(&routes, "2020-01-01", "foo").await, "old");
        assert_eq!(tag_of(&routes, "2021-01-01", "foo").await, "new");
        assert_eq!(tag_of(&routes, "2022-01-01", "foo").await, "new");
        assert_eq!(tag_of(&routes, "latest", "foo").await, "new");
    }

    #[test]
    fn test_registration_order_does_not_matter() {
        let mut forward = registry();
        forward
            .register(Registration::new("a", "2020-01-01", tagged("a")))
            .unwrap();
        forward.withdraw("a", "2020-06-01").unwrap();
        forward
            .register(Registration::new("b", "2020-03-01", tagged("b")))
            .unwrap();

        let mut backward = registry();
        backward
            .register(Registration::new("b", "2020-03-01", tagged("b")))
            .unwrap();
        backward.withdraw("a", "2020-06-01").unwrap();
        backward
            .register(Registration::new("a", "2020-01-01", tagged("a")))
            .unwrap();

        let (forward, backward) = (forward.routes(), backward.routes());
        assert_eq!(forward.versions(), backward.versions());
        for version in ["2020-01-01", "2020-03-01", "2020-06-01", "latest"] {
            assert_eq!(names(&forward, version), names(&backward, version), "{}", version);
        }
        assert_eq!(names(&forward, "2020-03-01"), ["a", "b"]);
        assert_eq!(names(&forward, "latest"), ["b"]);
    }

    #[test]
    fn test_preview_is_isolated() {
        let mut registry = registry();
        registry
            .register(Registration::new("ping", "2020-01-01", tagged("ping")))
            .unwrap();
        registry
            .register(Registration::new("shout", "preview", tagged("shout")))
            .unwrap();
        let routes = registry.routes();

        assert_eq!(names(&routes, "preview"), ["shout"]);
        assert_eq!(names(&routes, "latest"), ["ping"]);
        assert_eq!(names(&routes, "2020-01-01"), ["ping"]);
        assert_eq!(
            routes.versions(),
            vec![v("2020-01-01"), Version::Preview, Version::Latest]
        );
    }

    #[test]
    fn test_preview_only_has_no_latest() {
        let mut registry = registry();
        registry
            .register(Registration::new("shout", "preview", tagged("shout")))
            .unwrap();
        let routes = registry.routes();
        assert_eq!(routes.latest_version(), None);
        let err = routes.lookup(Version::Latest, &m("shout")).unwrap_err();
        assert_eq!(err.code(), codes::NOT_FOUND);
        assert_eq!(err.meta("missing"), Some("version"));
    }

    #[test]
    fn test_configuration_errors() {
        let mut registry = registry();
        registry
            .register(Registration::new("ping", "2020-01-01", tagged("ping")))
            .unwrap();

        let cases = [
            registry.register(Registration::new("ping", "2020-01-01", tagged("again"))).err(),
            registry.register(Registration::new("ping", "latest", tagged("latest"))).err(),
            registry.register(Registration::new("Ping", "2020-01-01", tagged("bad"))).err(),
            registry.register(Registration::new("ping", "2020-1-1", tagged("bad"))).err(),
            registry.withdraw("shout", "preview").err(),
            registry.withdraw("ping", "2020-01-01").err(),
        ];
        let rendered: Vec<String> = cases.iter().map(|e| format!("{:?}", e)).collect();
        assert!(matches!(cases[0], Some(ConfigError::DuplicateRegistration { .. })), "{:?}", rendered);
        assert!(matches!(cases[1], Some(ConfigError::LatestNotRegistrable { .. })));
        assert!(matches!(cases[2], Some(ConfigError::InvalidMethod(_))));
        assert!(matches!(cases[3], Some(ConfigError::InvalidVersion(_))));
        assert!(matches!(cases[4], Some(ConfigError::PreviewWithdrawal { .. })));
        assert!(matches!(cases[5], Some(ConfigError::DuplicateRegistration { .. })));

        // Failed mutations leave the table alone.
        assert_eq!(names(&registry.routes(), "latest"), ["ping"]);
    }

    #[test]
    fn test_schema_must_match_procedure_shape() {
        let mut registry = registry();
        let unit = Procedure::unit(|_ctx| async { Ok::<_, RpcError>(()) });
        let err = registry
            .register(Registration::new("ping", "2020-01-01", unit).request_schema(json!({"type": "object"})))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnexpectedRequestSchema { .. }));

        let unit = Procedure::unit(|_ctx| async { Ok::<_, RpcError>(()) });
        let err = registry
            .register(Registration::new("ping", "2020-01-01", unit).response_schema(json!({"type": "object"})))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnexpectedResponseSchema { .. }));

        let err = registry
            .register(Registration::new("ping", "2020-01-01", tagged("x")).response_schema(json!({"type": 5})))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSchema(_)));
    }

    #[test]
    fn test_registry_debug_summarizes_state() {
        let mut registry = registry();
        registry
            .register(Registration::new("ping", "2020-01-01", tagged("ping")))
            .unwrap();
        let debug = format!("{:?}", registry);
        assert!(debug.starts_with("Registry {"), "{}", debug);
        assert!(debug.contains("authenticated: true"), "{}", debug);

        let err = Registry::new().withdraw("ping", "2020-01-01").unwrap_err();
        assert!(matches!(err, ConfigError::MissingAuthentication));
    }

    #[test]
    fn test_registration_requires_authentication() {
        let mut registry = Registry::new();
        let err = registry
            .register(Registration::new("ping", "2020-01-01", tagged("ping")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingAuthentication));

        let err = registry.routes().lookup(Version::Latest, &m("ping")).unwrap_err();
        assert_eq!(err.code(), codes::ACCESS_DENIED);
    }

    #[test]
    fn test_lookup_reports_what_is_missing() {
        let mut registry = registry();
        registry
            .register(Registration::new("greet", "2020-01-01", tagged("greet")))
            .unwrap();
        let routes = registry.routes();

        let err = routes.lookup(v("2019-01-01"), &m("greet")).unwrap_err();
        assert_eq!(err.code(), codes::NOT_FOUND);
        assert_eq!(err.meta("missing"), Some("version"));

        let err = routes.lookup(v("2020-01-01"), &m("shout")).unwrap_err();
        assert_eq!(err.meta("missing"), Some("method"));

        let route = routes.lookup(Version::Latest, &m("greet")).unwrap();
        assert_eq!(route.version(), v("2020-01-01"));
    }

    #[test]
    fn test_empty_registry_serves_nothing() {
        let routes = registry().routes();
        assert!(routes.is_empty());
        assert!(routes.versions().is_empty());
        let err = routes.lookup(Version::Latest, &m("ping")).unwrap_err();
        assert_eq!(err.code(), codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_request_schema_runs_before_authentication() {
        let mut registry = Registry::new();
        registry.authenticate(ApiKeyAuth::new().with_key("ops", "s3cret"));
        let greet = Procedure::accepting_returning(|_ctx, req: serde_json::Value| async move {
            Ok::<_, RpcError>(req)
        });
        registry
            .register(
                Registration::new("greet", "2020-01-01", greet).request_schema(json!({
                    "type": "object",
                    "required": ["name"]
                })),
            )
            .unwrap();
        let routes = registry.routes();
        let route = routes.lookup(Version::Latest, &m("greet")).unwrap();

        let ctx = || Context::new(Version::Latest, m("greet"));
        let err = route.call(Call::new(ctx(), "{}")).await.unwrap_err();
        assert_eq!(err.code(), codes::BAD_REQUEST);

        let err = route
            .call(Call::new(ctx(), r#"{"name":"Ada"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::UNAUTHORIZED);

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("s3cret"));
        let reply = route
            .call(Call::new(ctx().with_headers(headers), r#"{"name":"Ada"}"#))
            .await
            .unwrap();
        assert_eq!(reply.status(), StatusCode::OK);
        assert_eq!(reply.body(), &bytes::Bytes::from_static(br#"{"name":"Ada"}"#));
    }

    #[tokio::test]
    async fn test_global_middleware_applies_to_earlier_registrations() {
        let mut registry = registry();
        registry
            .register(Registration::new("ping", "2020-01-01", tagged("ping")))
            .unwrap();
        let before = registry.routes();
        registry.use_middleware(from_fn(|_call: Call, _next: Next| async {
            Err::<Reply, _>(RpcError::new(codes::UNAVAILABLE))
        }));

        assert!(invoke(&before, "latest", "ping").await.is_ok());
        let err = invoke(&registry.routes(), "latest", "ping").await.unwrap_err();
        assert_eq!(err.code(), codes::UNAVAILABLE);
    }
}

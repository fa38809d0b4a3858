//! The demo service behind `verpc serve` and `verpc routes`.
//!
//! | method   | history                                                  |
//! |----------|----------------------------------------------------------|
//! | `ping`   | 2020-01-01                                               |
//! | `greet`  | 2020-01-01, replaced 2021-03-01 (adds `formal`)          |
//! | `echo`   | 2020-01-01, withdrawn 2020-06-01                         |
//! | `time`   | 2020-06-01                                               |
//! | `whoami` | 2021-03-01                                               |
//! | `shout`  | preview only                                             |

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use verpc_core::middleware::{Logging, Metrics, Principal};
use verpc_core::{ConfigError, Context, Middleware, Procedure, Registration, Registry, RpcError};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GreetRequest {
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GreetRequestV2 {
    pub name: String,
    #[serde(default)]
    pub formal: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct GreetResponse {
    pub greeting: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct EchoMessage {
    pub message: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct TimeResponse {
    pub now: String,
    pub version: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct WhoamiResponse {
    pub principal: String,
}

/// Build the demo registry behind `auth`, with logging and metrics as
/// global middleware.
pub fn registry(auth: impl Middleware) -> Result<Registry, ConfigError> {
    let mut registry = Registry::new();
    registry
        .authenticate(auth)
        .use_middleware(Logging)
        .use_middleware(Metrics);

    registry
        .register(Registration::new("ping", "2020-01-01", Procedure::unit(ping)))?
        .register(
            Registration::new("greet", "2020-01-01", Procedure::accepting_returning(greet))
                .request_schema_for::<GreetRequest>()
                .response_schema_for::<GreetResponse>(),
        )?
        .register(
            Registration::new("greet", "2021-03-01", Procedure::accepting_returning(greet_v2))
                .request_schema_for::<GreetRequestV2>()
                .response_schema_for::<GreetResponse>(),
        )?
        .register(
            Registration::new("echo", "2020-01-01", Procedure::accepting_returning(echo))
                .request_schema_for::<EchoMessage>(),
        )?
        .withdraw("echo", "2020-06-01")?
        .register(
            Registration::new("time", "2020-06-01", Procedure::returning(time))
                .response_schema_for::<TimeResponse>(),
        )?
        .register(Registration::new("whoami", "2021-03-01", Procedure::returning(whoami)))?
        .register(Registration::new("shout", "preview", Procedure::accepting_returning(shout)))?;

    Ok(registry)
}

async fn ping(_ctx: Context) -> Result<(), RpcError> {
    Ok(())
}

async fn greet(_ctx: Context, req: GreetRequest) -> Result<GreetResponse, RpcError> {
    Ok(GreetResponse {
        greeting: format!("Hello {}!", req.name),
    })
}

async fn greet_v2(_ctx: Context, req: GreetRequestV2) -> Result<GreetResponse, RpcError> {
    if req.name.trim().is_empty() {
        return Err(RpcError::bad_request().with_meta("field", "name"));
    }
    let greeting = if req.formal {
        format!("Good day, {}.", req.name)
    } else {
        format!("Hello {}!", req.name)
    };
    Ok(GreetResponse { greeting })
}

async fn echo(_ctx: Context, req: EchoMessage) -> Result<EchoMessage, RpcError> {
    Ok(req)
}

async fn time(ctx: Context) -> Result<TimeResponse, RpcError> {
    Ok(TimeResponse {
        now: Utc::now().to_rfc3339(),
        version: ctx.resolved_version().to_string(),
    })
}

async fn whoami(ctx: Context) -> Result<WhoamiResponse, RpcError> {
    let principal = match ctx.extensions().get::<Principal>() {
        Some(Principal::Key(name)) => name.clone(),
        Some(Principal::Anonymous) | None => "anonymous".to_string(),
    };
    Ok(WhoamiResponse { principal })
}

async fn shout(_ctx: Context, req: GreetRequest) -> Result<String, RpcError> {
    Ok(format!("{}!", req.name.to_uppercase()))
}

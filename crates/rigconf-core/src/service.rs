//! Request and response records of the manager's request surface, and the
//! dispatcher that turns every failure into an `ok: false` reply.
//!
//! Transport-agnostic: the HTTP server and the CLI both speak these records
//! as JSON.

use crate::manager::Manager;
use rigconf_schema::{Configuration, ConfigurationState, Strictness};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartConfiguration {
    #[serde(alias = "start_configuration")]
    pub name: String,
    #[serde(default)]
    pub strictness: Strictness,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopConfiguration {
    #[serde(default)]
    pub strictness: Strictness,
}

/// Reply to start, stop and update requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Ack {
    pub fn success() -> Self {
        Self {
            ok: true,
            message: None,
        }
    }

    /// Success that still has something to report.
    pub fn partial(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSummary {
    pub hardware_interface: String,
    pub controllers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationSummary {
    pub name: String,
    pub state: ConfigurationState,
    pub components: Vec<ComponentSummary>,
}

impl From<&Configuration> for ConfigurationSummary {
    fn from(configuration: &Configuration) -> Self {
        Self {
            name: configuration.name().to_owned(),
            state: configuration.state(),
            components: configuration
                .components()
                .iter()
                .map(|(resource, controllers)| ComponentSummary {
                    hardware_interface: resource.clone(),
                    controllers: controllers.iter().map(|c| c.id.clone()).collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationList {
    pub ok: bool,
    pub configurations: Vec<ConfigurationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Start(StartConfiguration),
    Stop(StopConfiguration),
    List,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Ack(Ack),
    List(ConfigurationList),
}

impl Reply {
    pub fn ok(&self) -> bool {
        match self {
            Reply::Ack(ack) => ack.ok,
            Reply::List(list) => list.ok,
        }
    }
}

fn dispatch(manager: &Manager, request: &Request) -> Reply {
    match request {
        Request::Start(req) => Reply::Ack(match manager.start(&req.name, req.strictness) {
            Ok(skipped) if skipped.is_empty() => Ack::success(),
            Ok(skipped) => Ack::partial(format!(
                "'{}' started without controllers: {}",
                req.name,
                skipped.join(", ")
            )),
            Err(e) => Ack::failure(e.to_string()),
        }),
        Request::Stop(req) => Reply::Ack(match manager.stop(req.strictness) {
            Ok(()) => Ack::success(),
            Err(e) => Ack::failure(e.to_string()),
        }),
        Request::List => Reply::List(match manager.list() {
            Ok(configurations) => ConfigurationList {
                ok: true,
                configurations: configurations.iter().map(ConfigurationSummary::from).collect(),
                message: None,
            },
            Err(e) => ConfigurationList {
                ok: false,
                configurations: Vec::new(),
                message: Some(e.to_string()),
            },
        }),
        Request::Update => Reply::Ack(match manager.refresh() {
            Ok(()) => Ack::success(),
            Err(e) => Ack::failure(e.to_string()),
        }),
    }
}

/// Serve one request. Never panics and never returns an error: every
/// failure, including a panic inside a handler, becomes `ok: false`.
pub fn handle(manager: &Manager, request: &Request) -> Reply {
    let reply = catch_unwind(AssertUnwindSafe(|| dispatch(manager, request))).unwrap_or_else(
        |_| {
            error!("request handler panicked: {request:?}");
            match request {
                Request::List => Reply::List(ConfigurationList {
                    ok: false,
                    configurations: Vec::new(),
                    message: Some("internal error".to_owned()),
                }),
                _ => Reply::Ack(Ack::failure("internal error")),
            }
        },
    );
    if !reply.ok() {
        warn!("request {request:?} failed");
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_request_accepts_wire_forms() {
        let req: StartConfiguration = serde_json::from_str(r#"{"name":"weld"}"#).unwrap();
        assert_eq!(req.strictness, Strictness::BestEffort);

        let req: StartConfiguration =
            serde_json::from_str(r#"{"start_configuration":"weld","strictness":2}"#).unwrap();
        assert_eq!(req.name, "weld");
        assert_eq!(req.strictness, Strictness::Strict);

        assert!(serde_json::from_str::<StartConfiguration>(r#"{"strictness":1}"#).is_err());
    }

    #[test]
    fn stop_request_defaults() {
        let req: StopConfiguration = serde_json::from_str("{}").unwrap();
        assert_eq!(req, StopConfiguration::default());
    }

    #[test]
    fn ack_serialization_omits_empty_message() {
        let json = serde_json::to_string(&Ack::success()).unwrap();
        assert_eq!(json, r#"{"ok":true}"#);
        let json = serde_json::to_string(&Ack::failure("boom")).unwrap();
        assert_eq!(json, r#"{"ok":false,"message":"boom"}"#);
    }
}

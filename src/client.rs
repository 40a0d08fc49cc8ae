//! Outbound service client.
//!
//! Calls a remote service by name. Only HTTP is spoken; every other protocol
//! fails with [`Error::UnsupportedProtocol`]. The cron adapter receives one
//! client per live protocol so scheduled client functions can reach the
//! other endpoints of the same process (or a remote one).

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::registry::Kwargs;
use crate::types::{str_field, u16_field, Config, Error, Protocol, Result};

/// Timeout applied to every outbound HTTP request.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Protocol to use instead of the client's default.
    pub protocol: Option<Protocol>,
    /// Request path; defaults to `/api/{service}`.
    pub path: Option<String>,
    /// HTTP method; defaults to `POST`.
    pub method: Option<String>,
}

/// Client for one protocol endpoint.
#[derive(Debug)]
pub struct ServiceClient {
    base_url: String,
    protocol: Protocol,
    // Built on first use so construction never happens inside an async context.
    http: OnceLock<reqwest::blocking::Client>,
}

impl ServiceClient {
    pub fn new(base_url: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            base_url: base_url.into(),
            protocol,
            http: OnceLock::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Call `service` with `args` and return the decoded JSON response.
    pub fn call(&self, service: &str, args: &Kwargs, options: &CallOptions) -> Result<Value> {
        let protocol = options.protocol.unwrap_or(self.protocol);
        if protocol != Protocol::Http {
            return Err(Error::UnsupportedProtocol(protocol));
        }

        let path = options
            .path
            .clone()
            .unwrap_or_else(|| format!("/api/{}", service));
        let method = options
            .method
            .as_deref()
            .unwrap_or("POST")
            .to_ascii_uppercase();
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let http = self.http_client()?;
        let request = if method == "GET" {
            let query: Vec<(String, String)> = args
                .iter()
                .map(|(key, value)| (key.clone(), query_value(value)))
                .collect();
            http.get(&url).query(&query)
        } else {
            let method = reqwest::Method::from_bytes(method.as_bytes())
                .map_err(|e| Error::configuration(format!("invalid http method {}: {}", method, e)))?;
            http.request(method, &url).json(args)
        };

        tracing::debug!(service, url = %url, "outbound call");
        let response = request.send()?.error_for_status()?;
        Ok(response.json()?)
    }

    fn http_client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.http.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(self.http.get_or_init(|| client))
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One client per live protocol, handed to the cron adapter.
#[derive(Debug, Clone, Default)]
pub struct ClientTable {
    clients: BTreeMap<Protocol, Arc<ServiceClient>>,
}

impl ClientTable {
    /// Build clients for the live protocols that have an addressable endpoint.
    pub fn from_config(config: &Config, live: &BTreeSet<Protocol>) -> Self {
        let mut clients = BTreeMap::new();
        for &protocol in live {
            if let Some(base_url) = base_url_for(config, protocol) {
                clients.insert(protocol, Arc::new(ServiceClient::new(base_url, protocol)));
            }
        }
        Self { clients }
    }

    pub fn insert(&mut self, client: ServiceClient) {
        self.clients.insert(client.protocol(), Arc::new(client));
    }

    pub fn get(&self, protocol: Protocol) -> Option<Arc<ServiceClient>> {
        self.clients.get(&protocol).cloned()
    }

    pub fn protocols(&self) -> BTreeSet<Protocol> {
        self.clients.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Endpoint of a protocol's adapter as configured for this process.
fn base_url_for(config: &Config, protocol: Protocol) -> Option<String> {
    let settings = config.adapter_settings(protocol);
    let host = str_field(&settings, "host", "localhost");
    let (default_port, scheme, suffix) = match protocol {
        Protocol::Http => (8080, "http://", ""),
        Protocol::Grpc => (50051, "", ""),
        Protocol::Zeromq => (5555, "", ""),
        Protocol::Amqp => (5672, "", ""),
        Protocol::Graphql => (8082, "http://", "/graphql"),
        _ => return None,
    };
    let port = u16_field(&settings, "port").unwrap_or(default_port);
    Some(format!("{}{}:{}{}", scheme, host, port, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_table_builds_base_urls() {
        let config = Config::default()
            .with_adapter(Protocol::Http, json!({ "host": "0.0.0.0", "port": 9000 }))
            .with_adapter(Protocol::Graphql, json!({}));
        let live: BTreeSet<Protocol> = [
            Protocol::Http,
            Protocol::Grpc,
            Protocol::Zeromq,
            Protocol::Graphql,
            Protocol::Cron,
        ]
        .into_iter()
        .collect();
        let table = ClientTable::from_config(&config, &live);

        assert_eq!(table.get(Protocol::Http).unwrap().base_url(), "http://0.0.0.0:9000");
        assert_eq!(table.get(Protocol::Grpc).unwrap().base_url(), "localhost:50051");
        assert_eq!(table.get(Protocol::Zeromq).unwrap().base_url(), "localhost:5555");
        assert_eq!(
            table.get(Protocol::Graphql).unwrap().base_url(),
            "http://localhost:8082/graphql"
        );
        assert!(table.get(Protocol::Cron).is_none());
        assert!(table.get(Protocol::Amqp).is_none());
    }

    #[test]
    fn test_non_http_protocol_is_unsupported() {
        let client = ServiceClient::new("localhost:50051", Protocol::Grpc);
        let err = client
            .call("add", &Kwargs::new(), &CallOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedProtocol(Protocol::Grpc)));

        let http = ServiceClient::new("http://localhost:1", Protocol::Http);
        let options = CallOptions {
            protocol: Some(Protocol::Mqtt),
            ..CallOptions::default()
        };
        assert!(matches!(
            http.call("add", &Kwargs::new(), &options),
            Err(Error::UnsupportedProtocol(Protocol::Mqtt))
        ));
    }

    fn operands() -> Kwargs {
        let mut args = Kwargs::new();
        args.insert("a".into(), json!(2));
        args.insert("b".into(), json!("three"));
        args
    }

    #[test]
    fn test_http_post_sends_json_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/add")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({ "a": 2, "b": "three" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result":5}"#)
            .create();

        let client = ServiceClient::new(server.url(), Protocol::Http);
        let result = client.call("add", &operands(), &CallOptions::default()).unwrap();

        assert_eq!(result, json!({ "result": 5 }));
        mock.assert();
    }

    #[test]
    fn test_http_get_sends_query_string() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/calc/add")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("a".into(), "2".into()),
                Matcher::UrlEncoded("b".into(), "three".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("7")
            .create();

        let client = ServiceClient::new(format!("{}/", server.url()), Protocol::Http);
        let options = CallOptions {
            path: Some("/calc/add".into()),
            method: Some("get".into()),
            ..CallOptions::default()
        };
        assert_eq!(client.call("add", &operands(), &options).unwrap(), json!(7));
        mock.assert();
    }

    #[test]
    fn test_http_error_status_is_reported() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/missing")
            .with_status(404)
            .with_body("no such service")
            .create();

        let client = ServiceClient::new(server.url(), Protocol::Http);
        let err = client
            .call("missing", &Kwargs::new(), &CallOptions::default())
            .unwrap_err();

        match err {
            Error::Http(e) => assert_eq!(e.status(), Some(reqwest::StatusCode::NOT_FOUND)),
            other => panic!("expected http error, got {:?}", other),
        }
        mock.assert();
    }
}

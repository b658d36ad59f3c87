//! Registry of active tool-server connections
//!
//! The registry owns every live [`ToolServerClient`] and remembers the
//! identity of the configuration set it was last activated with. Callers
//! pass the desired configuration on every use; when it matches the last
//! activation nothing happens, otherwise the whole set is torn down and
//! relaunched. Activations are serialised: a caller arriving while another
//! activation runs waits for it and then re-checks. Tool calls run on a
//! cloned handle outside the state lock, so a slow call never blocks an
//! activation.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};

use super::client::{ToolServerClient, ToolServerError, ToolServerLauncher, content_text};
use super::diagnostics::{ConnectionDiagnostic, check_connection};
use crate::types::{ToolServerConfig, ToolSpec};

/// Prefix added to external tool names when advertised to the model
pub const EXTERNAL_TOOL_PREFIX: &str = "mcp_";

/// Upper bound on a single external tool call
pub const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Identity of an activated configuration set
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    hash: String,
    count: usize,
    names: Vec<String>,
}

/// Fields of a config that participate in its identity
#[derive(Serialize)]
struct IdentityEntry<'a> {
    name: &'a str,
    command: &'a str,
    args: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    env: Option<BTreeMap<&'a str, &'a str>>,
}

impl Fingerprint {
    /// Fingerprint of a config set, independent of input order
    fn of(configs: &[ToolServerConfig]) -> Self {
        let mut sorted: Vec<&ToolServerConfig> = configs.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let entries: Vec<IdentityEntry<'_>> = sorted
            .iter()
            .map(|c| IdentityEntry {
                name: &c.name,
                command: &c.command,
                args: &c.args,
                env: (!c.env.is_empty()).then(|| {
                    c.env
                        .iter()
                        .map(|(k, v)| (k.as_str(), v.as_str()))
                        .collect()
                }),
            })
            .collect();

        // Serializing borrowed strings, maps and slices cannot fail
        let canonical = serde_json::to_vec(&entries).unwrap_or_default();
        let hash = format!("{:x}", Sha256::digest(&canonical));

        Self {
            hash,
            count: sorted.len(),
            names: sorted.iter().map(|c| c.name.clone()).collect(),
        }
    }

    fn empty() -> Self {
        Self::of(&[])
    }
}

/// Connections plus the fingerprint they were activated from
#[derive(Debug)]
struct RegistryState {
    connections: Vec<Arc<dyn ToolServerClient>>,
    last: Fingerprint,
}

/// Structured outcome of an external tool invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocationResult {
    /// Whether an active server advertises the tool
    pub found: bool,
    /// Whether the call succeeded
    pub success: bool,
    /// Tool name, unprefixed
    pub name: String,
    /// Human readable summary
    pub message: String,
    /// Raw server result on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error text on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolInvocationResult {
    fn not_found(name: &str) -> Self {
        Self {
            found: false,
            success: false,
            name: name.to_string(),
            message: format!("Tool '{name}' is not provided by any active tool server"),
            result: None,
            error: None,
        }
    }
}

/// Pool of live tool-server connections keyed by configuration identity
#[derive(Debug)]
pub struct ToolServerRegistry {
    launcher: Arc<dyn ToolServerLauncher>,
    state: RwLock<RegistryState>,
    activation: Mutex<()>,
    call_timeout: Duration,
}

impl ToolServerRegistry {
    /// Create an empty registry that launches servers with `launcher`
    pub fn new(launcher: Arc<dyn ToolServerLauncher>) -> Self {
        Self {
            launcher,
            state: RwLock::new(RegistryState {
                connections: Vec::new(),
                last: Fingerprint::empty(),
            }),
            activation: Mutex::new(()),
            call_timeout: TOOL_CALL_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Make the active connection set match `configs`
    ///
    /// A no-op when `configs` has the identity of the last activation.
    pub async fn ensure_active(&self, configs: &[ToolServerConfig]) -> Result<(), ToolServerError> {
        let wanted = Fingerprint::of(configs);
        if self.is_current(&wanted).await {
            return Ok(());
        }

        let _guard = self.activation.lock().await;
        // Another caller may have activated this set while we waited
        if self.is_current(&wanted).await {
            tracing::trace!("Tool server set activated by a concurrent caller");
            return Ok(());
        }

        self.activate(configs, wanted).await
    }

    async fn is_current(&self, wanted: &Fingerprint) -> bool {
        self.state.read().await.last == *wanted
    }

    async fn activate(
        &self,
        configs: &[ToolServerConfig],
        wanted: Fingerprint,
    ) -> Result<(), ToolServerError> {
        let started = Instant::now();

        let previous = std::mem::take(&mut self.state.write().await.connections);
        cleanup(previous).await;

        if configs.is_empty() {
            self.state.write().await.last = wanted;
            tracing::info!("No tool servers configured");
            return Ok(());
        }

        if let Err(e) = validate(configs) {
            self.state.write().await.last = Fingerprint::empty();
            tracing::error!(error = %e, "Rejected tool server configuration");
            return Err(e);
        }

        let launches = configs.iter().map(|config| async move {
            (config.name.as_str(), self.launcher.launch(config).await)
        });
        let mut connections = Vec::with_capacity(configs.len());
        for (name, outcome) in futures::future::join_all(launches).await {
            match outcome {
                Ok(client) => connections.push(Arc::from(client)),
                Err(e) => tracing::warn!(server = %name, error = %e, "Tool server failed to start"),
            }
        }

        tracing::info!(
            active = connections.len(),
            configured = configs.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Activated tool servers"
        );

        let mut state = self.state.write().await;
        state.connections = connections;
        state.last = wanted;
        Ok(())
    }

    /// Tool descriptors of every active server, prefixed with [`EXTERNAL_TOOL_PREFIX`]
    ///
    /// The returned descriptors are copies.
    pub async fn tool_specs(
        &self,
        configs: &[ToolServerConfig],
    ) -> Result<Vec<ToolSpec>, ToolServerError> {
        self.ensure_active(configs).await?;

        let state = self.state.read().await;
        Ok(state
            .connections
            .iter()
            .flat_map(|c| c.tools().iter().map(|t| t.prefixed(EXTERNAL_TOOL_PREFIX)))
            .collect())
    }

    /// Call `tool_name` (unprefixed) on whichever active server advertises it
    ///
    /// An unknown tool yields a `found: false` result rather than an error.
    pub async fn invoke(
        &self,
        tool_name: &str,
        input: Value,
        configs: &[ToolServerConfig],
    ) -> Result<ToolInvocationResult, ToolServerError> {
        self.ensure_active(configs).await?;

        let client = {
            let state = self.state.read().await;
            state
                .connections
                .iter()
                .find(|c| c.tools().iter().any(|t| t.name == tool_name))
                .cloned()
        };
        let Some(client) = client else {
            tracing::debug!(tool = %tool_name, "No active tool server advertises tool");
            return Ok(ToolInvocationResult::not_found(tool_name));
        };

        let started = Instant::now();
        let outcome =
            match tokio::time::timeout(self.call_timeout, client.call_tool(tool_name, input)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ToolServerError::Timeout(format!(
                    "'{tool_name}' did not finish within {}s",
                    self.call_timeout.as_secs_f64()
                ))),
            };
        tracing::debug!(
            server = %client.name(),
            tool = %tool_name,
            elapsed_ms = started.elapsed().as_millis(),
            ok = outcome.is_ok(),
            "Invoked external tool"
        );

        Ok(match outcome {
            Ok(result) => ToolInvocationResult {
                found: true,
                success: true,
                name: tool_name.to_string(),
                message: content_text(&result)
                    .unwrap_or_else(|| format!("Tool '{tool_name}' executed successfully")),
                result: Some(result),
                error: None,
            },
            Err(e) => ToolInvocationResult {
                found: true,
                success: false,
                name: tool_name.to_string(),
                message: format!("Tool '{tool_name}' failed"),
                result: None,
                error: Some(e.to_string()),
            },
        })
    }

    /// Launch `config` outside the tracked set and report how it went
    pub async fn test_connection(&self, config: &ToolServerConfig) -> ConnectionDiagnostic {
        check_connection(self.launcher.as_ref(), config).await
    }

    /// Names of the servers currently connected
    pub async fn active_servers(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .connections
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Shut down every connection and forget the last activation
    pub async fn shutdown(&self) {
        let _guard = self.activation.lock().await;
        let previous = {
            let mut state = self.state.write().await;
            state.last = Fingerprint::empty();
            std::mem::take(&mut state.connections)
        };
        cleanup(previous).await;
    }
}

/// Best-effort shutdown of a connection set
async fn cleanup(connections: Vec<Arc<dyn ToolServerClient>>) {
    for client in connections {
        if let Err(e) = client.shutdown().await {
            tracing::warn!(server = %client.name(), error = %e, "Failed to shut down tool server");
        }
    }
}

/// Check the shape of a config set before launching anything
fn validate(configs: &[ToolServerConfig]) -> Result<(), ToolServerError> {
    let mut seen = HashSet::with_capacity(configs.len());
    for config in configs {
        let invalid = |reason: &str| ToolServerError::InvalidConfig {
            name: config.name.clone(),
            reason: reason.to_string(),
        };
        if config.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if config.command.trim().is_empty() {
            return Err(invalid("command is empty"));
        }
        if !seen.insert(config.name.as_str()) {
            return Err(invalid("name is used by more than one server"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct FakeClient {
        name: String,
        tools: Vec<ToolSpec>,
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolServerClient for FakeClient {
        fn name(&self) -> &str {
            &self.name
        }

        fn tools(&self) -> &[ToolSpec] {
            &self.tools
        }

        async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, ToolServerError> {
            if tool == "explode" {
                return Err(ToolServerError::ToolFailed("boom".into()));
            }
            if tool == "wait" {
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
            Ok(json!({
                "content": [{"type": "text", "text": format!("{}:{tool}:{arguments}", self.name)}]
            }))
        }

        async fn shutdown(&self) -> Result<(), ToolServerError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Launches fake clients advertising `<server>_tool` (and `explode`)
    #[derive(Debug, Default)]
    struct FakeLauncher {
        launches: AtomicUsize,
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolServerLauncher for FakeLauncher {
        async fn launch(
            &self,
            config: &ToolServerConfig,
        ) -> Result<Box<dyn ToolServerClient>, ToolServerError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if config.command == "missing" {
                return Err(ToolServerError::SpawnFailed {
                    command: config.command.clone(),
                    error: "No such file or directory (os error 2)".into(),
                });
            }
            Ok(Box::new(FakeClient {
                name: config.name.clone(),
                tools: vec![
                    ToolSpec::new(
                        format!("{}_tool", config.name),
                        "Fake tool",
                        json!({"type": "object"}),
                    ),
                    ToolSpec::new("explode", "Always fails", json!({"type": "object"})),
                    ToolSpec::new("wait", "Sleeps for three seconds", json!({"type": "object"})),
                ],
                shutdowns: Arc::clone(&self.shutdowns),
            }))
        }
    }

    fn registry() -> (ToolServerRegistry, Arc<FakeLauncher>) {
        let launcher = Arc::new(FakeLauncher::default());
        (ToolServerRegistry::new(launcher.clone()), launcher)
    }

    fn configs() -> Vec<ToolServerConfig> {
        vec![
            ToolServerConfig::new("alpha", "alpha-server", vec!["--stdio".into()]),
            ToolServerConfig::new("beta", "beta-server", vec![]).with_env("TOKEN", "x"),
        ]
    }

    #[test]
    fn test_fingerprint_ignores_order_and_description() {
        let mut reordered = configs();
        reordered.reverse();
        reordered[0] = reordered[0].clone().with_description("changed");
        assert_eq!(Fingerprint::of(&configs()), Fingerprint::of(&reordered));

        let mut changed = configs();
        changed[1] = changed[1].clone().with_env("TOKEN", "y");
        assert_ne!(Fingerprint::of(&configs()).hash, Fingerprint::of(&changed).hash);

        let fp = Fingerprint::of(&configs());
        assert_eq!(fp.count, 2);
        assert_eq!(fp.names, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn test_ensure_active_is_idempotent() {
        let (registry, launcher) = registry();
        registry.ensure_active(&configs()).await.unwrap();

        let mut reordered = configs();
        reordered.reverse();
        registry.ensure_active(&reordered).await.unwrap();

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
        assert_eq!(registry.active_servers().await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_active_activates_once() {
        let (registry, launcher) = registry();
        let configs = configs();

        let (a, b) = tokio::join!(
            registry.ensure_active(&configs),
            registry.ensure_active(&configs)
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
        let mut active = registry.active_servers().await;
        active.sort();
        assert_eq!(active, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn test_changed_config_relaunches_and_cleans_up() {
        let (registry, launcher) = registry();
        registry.ensure_active(&configs()).await.unwrap();

        let single = vec![ToolServerConfig::new("gamma", "gamma-server", vec![])];
        registry.ensure_active(&single).await.unwrap();

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 3);
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 2);
        assert_eq!(registry.active_servers().await, vec!["gamma".to_string()]);

        registry.ensure_active(&[]).await.unwrap();
        assert!(registry.active_servers().await.is_empty());
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_launch_is_omitted() {
        let (registry, _) = registry();
        let mut configs = configs();
        configs.push(ToolServerConfig::new("broken", "missing", vec![]));

        registry.ensure_active(&configs).await.unwrap();
        let mut active = registry.active_servers().await;
        active.sort();
        assert_eq!(active, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_config_resets_and_retries() {
        let (registry, launcher) = registry();
        let bad = vec![ToolServerConfig::new("empty", "  ", vec![])];

        let err = registry.ensure_active(&bad).await.unwrap_err();
        assert!(matches!(err, ToolServerError::InvalidConfig { .. }));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);

        // Not recorded as current, so the next call validates again
        assert!(registry.ensure_active(&bad).await.is_err());

        let duplicate = vec![
            ToolServerConfig::new("dup", "a", vec![]),
            ToolServerConfig::new("dup", "b", vec![]),
        ];
        assert!(registry.ensure_active(&duplicate).await.is_err());
    }

    #[tokio::test]
    async fn test_tool_specs_are_prefixed_copies() {
        let (registry, _) = registry();
        let configs = configs();

        let mut specs = registry.tool_specs(&configs).await.unwrap();
        assert!(specs.iter().any(|s| s.name == "mcp_alpha_tool"));
        assert!(specs.iter().all(|s| s.name.starts_with(EXTERNAL_TOOL_PREFIX)));

        for spec in &mut specs {
            spec.name = "mutated".into();
            spec.input_schema = json!(null);
        }

        let fresh = registry.tool_specs(&configs).await.unwrap();
        assert!(fresh.iter().all(|s| s.name != "mutated"));
        assert!(fresh.iter().all(|s| s.input_schema == json!({"type": "object"})));
    }

    #[tokio::test]
    async fn test_invoke_found() {
        let (registry, _) = registry();
        let result = registry
            .invoke("beta_tool", json!({"q": 1}), &configs())
            .await
            .unwrap();

        assert!(result.found);
        assert!(result.success);
        assert_eq!(result.name, "beta_tool");
        assert_eq!(result.message, r#"beta:beta_tool:{"q":1}"#);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_invoke_failure_is_structured() {
        let (registry, _) = registry();
        let result = registry
            .invoke("explode", json!({}), &configs())
            .await
            .unwrap();

        assert!(result.found);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Tool call failed: boom"));
    }

    #[tokio::test]
    async fn test_invoke_not_found() {
        let (registry, _) = registry();

        let empty = registry.invoke("anything", json!({}), &[]).await.unwrap();
        assert!(!empty.found);
        assert!(!empty.success);

        let missing = registry
            .invoke("gamma_tool", json!({}), &configs())
            .await
            .unwrap();
        assert!(!missing.found);
        assert!(!missing.success);
    }

    #[tokio::test]
    async fn test_shutdown_forgets_activation() {
        let (registry, launcher) = registry();
        registry.ensure_active(&configs()).await.unwrap();
        registry.shutdown().await;

        assert!(registry.active_servers().await.is_empty());
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 2);

        registry.ensure_active(&configs()).await.unwrap();
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_slow_call_does_not_block_activation() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);
        let configs = vec![ToolServerConfig::new("alpha", "alpha-server", vec![])];
        registry.ensure_active(&configs).await.unwrap();

        let call = tokio::spawn({
            let registry = Arc::clone(&registry);
            let configs = configs.clone();
            async move { registry.invoke("wait", json!({}), &configs).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(1), registry.ensure_active(&[]))
            .await
            .expect("activation waited for an in-flight tool call")
            .unwrap();
        assert!(registry.active_servers().await.is_empty());

        let result = call.await.unwrap().unwrap();
        assert!(result.found);
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_call_timeout_is_a_structured_failure() {
        let launcher = Arc::new(FakeLauncher::default());
        let registry =
            ToolServerRegistry::new(launcher).with_call_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let result = registry.invoke("wait", json!({}), &configs()).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(result.found);
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Timed out"));
    }
}

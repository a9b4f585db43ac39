//! Daemon configuration: flags with environment fallbacks.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, ValueEnum};

use warmpool_orchestrator::{PodResources, PodTemplate};
use warmpool_reconcile::PoolLimits;
use warmpool_state::QueueKeys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Args)]
pub struct PoolArgs {
    /// HTTP listen port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// HTTP listen address.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Warm pods to keep ready.
    #[arg(long, env = "MIN_IDLE", default_value_t = 3)]
    pub min_idle: usize,

    /// Cap on warm + active + booting pods.
    #[arg(long, env = "MAX_POD", default_value_t = 20)]
    pub max_pods: usize,

    /// Namespace agent pods are created in.
    #[arg(long, env = "NAMESPACE", default_value = "ny-voicebot")]
    pub namespace: String,

    /// Agent container image.
    #[arg(long, env = "IMAGE")]
    pub image: String,

    /// CPU request and limit per pod.
    #[arg(long, env = "POD_CPU", default_value = "500m")]
    pub pod_cpu: String,

    /// Memory request and limit per pod.
    #[arg(long, env = "POD_MEMORY", default_value = "512Mi")]
    pub pod_memory: String,

    /// Port the agent listens on inside its pod.
    #[arg(long, env = "AGENT_PORT", default_value_t = 8080)]
    pub agent_port: u16,

    /// Pod name prefix and `app` label value.
    #[arg(long, env = "POD_NAME_PREFIX", default_value = "voice-agent")]
    pub pod_name_prefix: String,

    /// Coordination store URL (`redis://…` or `memory://`).
    #[arg(long, env = "STORE_URL", default_value = "redis://redis:6379")]
    pub store_url: String,

    #[arg(long, env = "REDIS_KEY_WARM_PODS", default_value = "ny-voice-warm-pods")]
    pub warm_key: String,

    #[arg(long, env = "REDIS_KEY_ACTIVE_PODS", default_value = "ny-voice-active-pods")]
    pub active_key: String,

    #[arg(long, env = "REDIS_KEY_POD_COUNTER", default_value = "ny-voice-next-pod")]
    pub counter_key: String,

    /// Per-operation store timeout.
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 5000)]
    pub store_timeout_ms: u64,

    /// Call hand-off timeout.
    #[arg(long, env = "HANDOFF_TIMEOUT_MS", default_value_t = 5000)]
    pub handoff_timeout_ms: u64,

    #[arg(long, env = "TRIM_INTERVAL_SECS", default_value_t = 300)]
    pub trim_interval_secs: u64,

    /// Pause before re-subscribing to pod events after a watch failure.
    #[arg(long, env = "WATCH_RETRY_SECS", default_value_t = 2)]
    pub watch_retry_secs: u64,

    /// Concurrent pod create/delete operations.
    #[arg(long, env = "MAX_BACKGROUND_TASKS", default_value_t = 16)]
    pub max_background_tasks: usize,

    /// How long shutdown waits for in-flight pod operations.
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    pub shutdown_grace_secs: u64,

    /// URL pods use to reach this controller; injected as POD_MANAGER_URL.
    #[arg(long, env = "CONTROLLER_URL")]
    pub controller_url: Option<String>,

    /// Static env for every pod, as KEY=VALUE.
    #[arg(long = "pod-env", env = "POD_ENV", value_delimiter = ',', value_parser = parse_key_val)]
    pub pod_env: Vec<(String, String)>,

    /// Controller env vars copied verbatim into every pod.
    #[arg(long = "forward-env", env = "FORWARD_ENV", value_delimiter = ',')]
    pub forward_env: Vec<String>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

impl PoolArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_pods == 0 {
            bail!("max pods must be greater than zero");
        }
        if self.min_idle > self.max_pods {
            bail!(
                "min idle ({}) exceeds max pods ({})",
                self.min_idle,
                self.max_pods
            );
        }
        if self.image.trim().is_empty() {
            bail!("agent image must not be empty");
        }
        if self.pod_name_prefix.is_empty() {
            bail!("pod name prefix must not be empty");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("invalid listen host {:?}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn limits(&self) -> PoolLimits {
        PoolLimits {
            min_idle: self.min_idle,
            max_pods: self.max_pods,
        }
    }

    pub fn queue_keys(&self) -> QueueKeys {
        QueueKeys {
            warm: self.warm_key.clone(),
            active: self.active_key.clone(),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    /// Build the pod template. Forwarded variables are resolved through
    /// `lookup`; a missing one is injected as an empty string.
    pub fn pod_template(&self, lookup: impl Fn(&str) -> Option<String>) -> PodTemplate {
        let mut template = PodTemplate::new(&self.pod_name_prefix, &self.image)
            .with_port(self.agent_port)
            .with_resources(PodResources {
                cpu: self.pod_cpu.clone(),
                memory: self.pod_memory.clone(),
            });

        for (key, value) in &self.pod_env {
            template = template.with_env(key, value);
        }
        for key in &self.forward_env {
            template = template.with_env(key, lookup(key).unwrap_or_default());
        }
        template = template.with_env("PORT", self.agent_port.to_string());
        if let Some(url) = &self.controller_url {
            template = template.with_env("POD_MANAGER_URL", url);
        }
        template
    }
}

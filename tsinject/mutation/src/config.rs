//! Annotation-driven configuration for the sidecar injector.
//!
//! Annotation and environment variable names below are external contracts:
//! operators set them on pods, and the tailscale sidecar image reads them.
//! They must not change, typos included.

use k8s_openapi::api::core::v1::Pod;

/// Environment variables consumed by the tailscale sidecar image.
pub const SECRET_NAME_KEY: &str = "TS_KUBE_SECRET";
pub const USERSPACE_KEY: &str = "TS_USERSPACE";
pub const PRE_AUTH_KEY_KEY: &str = "TS_AUTHKEY";
pub const EXTRA_ARGS_KEY: &str = "TS_EXTRA_ARGS";

/// Pods opt into injection by carrying this label. The label value is
/// ignored.
pub const INJECT_LABEL: &str = "tailscale-inject";

pub const LOGIN_SERVER_ANNOTATION: &str = "tailscale.iced.cool/login-server";
/// `sercret` is a typo, but it shipped; operators already set this key, so
/// it stays misspelled.
pub const SECRET_NAME_ANNOTATION: &str = "tailscale.iced.cool/sercret-name";
/// PRESENCE of this annotation enables userspace networking; the value is
/// ignored entirely. Setting it to `"false"` still enables userspace mode.
/// Remove the annotation to disable it.
pub const ENABLE_USERSPACE_ANNOTATION: &str = "tailscale.iced.cool/userspace-enabled";
/// Which headscale user to assume when creating pre-auth keys.
pub const USER_NAME_ANNOTATION: &str = "tailscale.iced.cool/user";

pub const IMAGE: &str = "ghcr.io/tailscale/tailscale:latest";
pub const DEFAULT_SECRET_NAME: &str = "tailscale-auth";

/// Static injector settings, built once at process start and shared by
/// every mutation call.
#[derive(Clone, Debug)]
pub struct InjectorSettings {
    /// Sidecar image reference.
    pub image: String,
    /// Pre-issued auth key. When set, the injector reuses it instead of
    /// minting a fresh ephemeral key per pod.
    pub pre_auth_key: Option<String>,
}

impl Default for InjectorSettings {
    fn default() -> Self {
        InjectorSettings {
            image: IMAGE.to_string(),
            pre_auth_key: None,
        }
    }
}

/// Resolved per-pod mutation configuration.
///
/// Derived from pod annotations, falling back to process-wide defaults.
/// Owned by a single mutation call and discarded once the sidecar spec is
/// built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutationConfig {
    pub userspace: bool,
    pub pre_auth_key: Option<String>,
    pub secret_name: String,
    pub login_server: Option<String>,
    pub user: String,
    pub image: String,
    pub extra_args: Vec<String>,
}

fn annotation<'p>(pod: &'p Pod, key: &str) -> Option<&'p str> {
    pod.metadata.annotations.as_ref()?.get(key).map(String::as_str)
}

/// Whether the pod carries the [`INJECT_LABEL`] marker.
pub fn wants_injection(pod: &Pod) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .is_some_and(|labels| labels.contains_key(INJECT_LABEL))
}

impl MutationConfig {
    /// Resolves the mutation configuration for one pod.
    ///
    /// Pure and total: the same pod and settings always resolve to the same
    /// configuration, and an absent annotation falls back to its documented
    /// default, never to an error. No network calls happen here.
    pub fn resolve(pod: &Pod, settings: &InjectorSettings) -> Self {
        let login_server = annotation(pod, LOGIN_SERVER_ANNOTATION)
            .filter(|server| !server.is_empty())
            .map(str::to_string);

        // The only derived flag.
        let extra_args = login_server
            .iter()
            .map(|server| format!("--login-server={server}"))
            .collect();

        MutationConfig {
            userspace: annotation(pod, ENABLE_USERSPACE_ANNOTATION).is_some(),
            pre_auth_key: settings.pre_auth_key.clone(),
            secret_name: annotation(pod, SECRET_NAME_ANNOTATION)
                .unwrap_or(DEFAULT_SECRET_NAME)
                .to_string(),
            login_server,
            user: annotation(pod, USER_NAME_ANNOTATION)
                .unwrap_or_default()
                .to_string(),
            image: settings.image.clone(),
            extra_args,
        }
    }

    /// Stringified userspace flag, as the sidecar image expects it.
    pub fn userspace_value(&self) -> &'static str {
        if self.userspace {
            "true"
        } else {
            "false"
        }
    }
}
